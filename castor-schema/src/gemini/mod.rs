//! Typed Gemini native request/response schema.
//!
//! The proxy parses incoming native requests into typed structs rather than
//! shuttling raw `serde_json::Value` around:
//! - known fields (systemInstruction, generationConfig.thinkingConfig, parts)
//!   get compile-time access for the request rewriter,
//! - unknown fields survive through `extra` catch-all maps at every level.

mod content;
mod generation;
mod model_list;
mod request;
mod response;

pub use content::{Content, FileData, InlineData, Part};
pub use generation::{GenerationConfig, ThinkingConfig};
pub use model_list::{GeminiModel, GeminiModelList};
pub use request::{GenerateContentRequest, SafetySetting};
pub use response::{Candidate, GeminiResponseBody};
