use serde::{Deserialize, Serialize};
use url::Url;

/// Default preamble required by the Antigravity upstream. The upstream applies
/// strict text matching; any character change (including missing spaces) may
/// fail validation and trigger HTTP 429.
pub const ANTIGRAVITY_SYSTEM_PREAMBLE: &str = "You are Antigravity, a powerful agentic AI coding assistant designed by the Google Deepmind team working on Advanced Agentic Coding. You are pair programming with a USER to solve their coding task. The task may require creating a new codebase, modifying or debugging an existing codebase, or simply answering a question.**Absolute paths only****Proactiveness**";

/// Shared fallbacks for per-upstream settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamDefaults {
    /// Optional upstream HTTP proxy used when the per-upstream value is unset.
    /// TOML: `upstreams.defaults.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Max credential-switching attempts per request.
    /// TOML: `upstreams.defaults.retry_max_times`. Default: `3`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,

    /// Variant-agnostic OAuth client pair, used when neither the credential
    /// nor the upstream section carries one.
    /// TOML: `upstreams.defaults.oauth_client_id` / `oauth_client_secret`.
    #[serde(default = "default_oauth_client_id")]
    pub oauth_client_id: String,
    #[serde(default = "default_oauth_client_secret")]
    pub oauth_client_secret: String,

    /// OAuth token-refresh requests per second, process-wide.
    /// TOML: `upstreams.defaults.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: u32,
}

impl Default for UpstreamDefaults {
    fn default() -> Self {
        Self {
            proxy: None,
            retry_max_times: default_retry_max_times(),
            oauth_client_id: default_oauth_client_id(),
            oauth_client_secret: default_oauth_client_secret(),
            oauth_tps: default_oauth_tps(),
        }
    }
}

/// Gemini-CLI (code-assist) upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiCliUpstreamConfig {
    /// Base API URL.
    /// TOML: `upstreams.geminicli.api_url`.
    /// Default: `https://cloudcode-pa.googleapis.com`.
    #[serde(default = "default_geminicli_api_url")]
    pub api_url: Url,

    /// Optional upstream HTTP proxy; falls back to `upstreams.defaults.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Model allowlist advertised on the model-list endpoints.
    /// TOML: `upstreams.geminicli.model_list`.
    #[serde(default = "default_geminicli_model_list")]
    pub model_list: Vec<String>,

    /// Max credential-switching attempts; falls back to defaults.
    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

impl Default for GeminiCliUpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_geminicli_api_url(),
            proxy: None,
            model_list: default_geminicli_model_list(),
            retry_max_times: None,
        }
    }
}

/// Antigravity upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AntigravityUpstreamConfig {
    /// Base API URL.
    /// TOML: `upstreams.antigravity.api_url`.
    /// Default: `https://daily-cloudcode-pa.googleapis.com`.
    #[serde(default = "default_antigravity_api_url")]
    pub api_url: Url,

    /// Optional upstream HTTP proxy; falls back to `upstreams.defaults.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Model allowlist advertised on the model-list endpoints.
    /// TOML: `upstreams.antigravity.model_list`.
    #[serde(default = "default_antigravity_model_list")]
    pub model_list: Vec<String>,

    /// Max credential-switching attempts; falls back to defaults.
    #[serde(default)]
    pub retry_max_times: Option<usize>,

    /// Variant-specific OAuth client pair; falls back to defaults.
    #[serde(default = "default_antigravity_client_id")]
    pub oauth_client_id: String,
    #[serde(default = "default_antigravity_client_secret")]
    pub oauth_client_secret: String,

    /// Mandatory system preamble prepended ahead of user system text.
    /// TOML: `upstreams.antigravity.system_preamble`.
    #[serde(default = "default_system_preamble")]
    pub system_preamble: String,
}

impl Default for AntigravityUpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_antigravity_api_url(),
            proxy: None,
            model_list: default_antigravity_model_list(),
            retry_max_times: None,
            oauth_client_id: default_antigravity_client_id(),
            oauth_client_secret: default_antigravity_client_secret(),
            system_preamble: default_system_preamble(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct UpstreamsConfig {
    #[serde(default)]
    pub defaults: UpstreamDefaults,

    #[serde(default)]
    pub geminicli: GeminiCliUpstreamConfig,

    #[serde(default)]
    pub antigravity: AntigravityUpstreamConfig,
}

/// Effective per-variant settings after fallback resolution.
#[derive(Debug, Clone)]
pub struct ResolvedUpstreams {
    pub geminicli_api_url: Url,
    pub geminicli_proxy: Option<Url>,
    pub geminicli_model_list: Vec<String>,
    pub geminicli_retry_max_times: usize,
    pub antigravity_api_url: Url,
    pub antigravity_proxy: Option<Url>,
    pub antigravity_model_list: Vec<String>,
    pub antigravity_retry_max_times: usize,
    pub antigravity_oauth_client_id: String,
    pub antigravity_oauth_client_secret: String,
    pub antigravity_system_preamble: String,
    pub default_oauth_client_id: String,
    pub default_oauth_client_secret: String,
    pub oauth_tps: u32,
}

impl UpstreamsConfig {
    pub fn resolve(&self) -> ResolvedUpstreams {
        ResolvedUpstreams {
            geminicli_api_url: self.geminicli.api_url.clone(),
            geminicli_proxy: self
                .geminicli
                .proxy
                .clone()
                .or_else(|| self.defaults.proxy.clone()),
            geminicli_model_list: self.geminicli.model_list.clone(),
            geminicli_retry_max_times: self
                .geminicli
                .retry_max_times
                .unwrap_or(self.defaults.retry_max_times),
            antigravity_api_url: self.antigravity.api_url.clone(),
            antigravity_proxy: self
                .antigravity
                .proxy
                .clone()
                .or_else(|| self.defaults.proxy.clone()),
            antigravity_model_list: self.antigravity.model_list.clone(),
            antigravity_retry_max_times: self
                .antigravity
                .retry_max_times
                .unwrap_or(self.defaults.retry_max_times),
            antigravity_oauth_client_id: self.antigravity.oauth_client_id.clone(),
            antigravity_oauth_client_secret: self.antigravity.oauth_client_secret.clone(),
            antigravity_system_preamble: self.antigravity.system_preamble.clone(),
            default_oauth_client_id: self.defaults.oauth_client_id.clone(),
            default_oauth_client_secret: self.defaults.oauth_client_secret.clone(),
            oauth_tps: self.defaults.oauth_tps,
        }
    }
}

fn default_retry_max_times() -> usize {
    3
}

fn default_oauth_tps() -> u32 {
    5
}

fn default_geminicli_api_url() -> Url {
    Url::parse("https://cloudcode-pa.googleapis.com")
        .expect("default geminicli api_url must be a valid URL")
}

fn default_antigravity_api_url() -> Url {
    Url::parse("https://daily-cloudcode-pa.googleapis.com")
        .expect("default antigravity api_url must be a valid URL")
}

fn default_oauth_client_id() -> String {
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com".to_string()
}

fn default_oauth_client_secret() -> String {
    "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".to_string()
}

fn default_antigravity_client_id() -> String {
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com".to_string()
}

fn default_antigravity_client_secret() -> String {
    "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".to_string()
}

fn default_system_preamble() -> String {
    ANTIGRAVITY_SYSTEM_PREAMBLE.to_string()
}

fn default_geminicli_model_list() -> Vec<String> {
    [
        "gemini-2.5-flash",
        "gemini-2.5-pro",
        "gemini-3-flash-preview",
        "gemini-3-pro-preview",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_antigravity_model_list() -> Vec<String> {
    [
        "gemini-2.5-flash",
        "gemini-3-flash",
        "gemini-3-pro-preview",
        "claude-sonnet-4-5",
        "claude-opus-4-5",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
