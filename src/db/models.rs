use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    /// Total requests allowed per day across all model classes.
    pub daily_quota: i64,
    /// Reward quota earned by donating public credentials; shrinks when a
    /// donated credential dies.
    pub bonus_quota: i64,
    /// Per-class overrides; 0 means "use the computed default".
    pub quota_flash: i64,
    pub quota_pro: i64,
    pub quota_tier3: i64,
    pub created_at: DateTime<Utc>,
}

/// One pooled upstream credential. Secret columns hold vault ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbCredential {
    pub id: i64,
    pub user_id: Option<i64>,
    /// Upstream variant: `geminicli` or `antigravity`.
    pub variant: String,
    /// `oauth` or `api_key`.
    pub credential_kind: String,
    pub email: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    /// Optional credential-local OAuth client pair.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Upstream tenant id; lazily discovered on first use.
    pub project_id: Option<String>,
    /// Capability mark: `"2.5"` or `"3"`.
    pub model_tier: Option<String>,
    /// `free` or `pro`.
    pub account_class: String,
    pub is_active: bool,
    /// Opted into the shared pool.
    pub is_public: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Per-model-group cooldown stamps.
    pub last_used_flash: Option<DateTime<Utc>>,
    pub last_used_pro: Option<DateTime<Utc>>,
    pub last_used_tier3: Option<DateTime<Utc>>,
    pub total_requests: i64,
    pub failed_requests: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DbCredential {
    pub fn is_tier3(&self) -> bool {
        self.model_tier.as_deref() == Some("3")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbUsageLog {
    pub id: i64,
    pub user_id: i64,
    pub credential_id: Option<i64>,
    pub credential_email: Option<String>,
    /// Variant-prefixed model string as requested by the client.
    pub model: String,
    pub endpoint: String,
    /// 0 marks the in-flight placeholder; finalisation sets the real status.
    pub status_code: i64,
    pub latency_ms: i64,
    pub error_type: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub cd_seconds: Option<i64>,
    pub request_body: Option<String>,
    pub retry_count: i64,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbErrorMessageRule {
    pub id: i64,
    pub error_type: Option<String>,
    pub keyword: Option<String>,
    pub custom_message: String,
    pub priority: i64,
    pub is_active: bool,
}
