pub mod client;
pub mod oauth;
pub mod project;

pub use client::UpstreamClient;
pub use oauth::TokenRefresher;
pub use project::resolve_project_id;

use serde::{Deserialize, Serialize};

/// Fixed User-Agent for the Gemini-CLI (code-assist) upstream.
pub const GEMINICLI_USER_AGENT: &str = "grpc-java-okhttp/1.68.1";

/// Fixed User-Agent for the Antigravity upstream.
pub const ANTIGRAVITY_USER_AGENT: &str = "antigravity/1.11.3 windows/amd64";

/// OAuth token endpoint shared by both variants.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The two upstream variants this proxy fronts. Both speak the same
/// `{model, project, request}` envelope but differ in host, headers,
/// User-Agent and OAuth client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    GeminiCli,
    Antigravity,
}

impl Variant {
    /// Stable string stored in the `credentials.variant` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::GeminiCli => "geminicli",
            Variant::Antigravity => "antigravity",
        }
    }

    /// Model-name prefix selecting this variant on the OpenAI surface.
    pub fn model_prefix(self) -> &'static str {
        match self {
            Variant::GeminiCli => "gcli-",
            Variant::Antigravity => "agy-",
        }
    }

    pub fn user_agent(self) -> &'static str {
        match self {
            Variant::GeminiCli => GEMINICLI_USER_AGENT,
            Variant::Antigravity => ANTIGRAVITY_USER_AGENT,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
