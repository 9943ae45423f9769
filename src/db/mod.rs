//! Database module: the SQLite store is the only authoritative shared state.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `actor.rs`: ractor actor owning the pool; all access goes through
//!   `DbActorHandle`
//! - `credentials.rs` / `usage.rs`: query implementations

mod actor;
mod credentials;
mod usage;

pub mod models;
pub mod schema;

pub use actor::{
    ApiKeyCreate, CandidateQuery, CredentialCreate, CredentialMutation, DbActorHandle, PoolScope,
    QuotaClass, UsageDraft, UsageFinal, UserCreate, UserCredStats, spawn,
};
pub use models::{DbCredential, DbErrorMessageRule, DbUsageLog, DbUser};
pub use schema::SQLITE_INIT;
