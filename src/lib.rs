pub mod config;
pub mod db;
pub mod error;
pub mod rewrite;
pub mod server;
pub mod service;
pub mod upstream;
pub mod vault;

pub use error::{ErrorKind, ProxyError};
pub use upstream::Variant;
pub use vault::CryptoVault;
