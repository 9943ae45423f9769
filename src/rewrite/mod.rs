//! Bidirectional request/response translation.
//!
//! - `model_name`: client-facing model-name namespace (variant prefixes,
//!   streaming prefixes, thinking/search suffixes, Claude aliases)
//! - `openai`: OpenAI chat protocol ⇄ native contents/candidates
//! - `native`: per-variant normalisation applied to every outbound request

pub mod model_name;
pub mod native;
pub mod openai;

pub use model_name::{ModelRoute, base_model_name, parse_route};
pub use native::normalize_request;
