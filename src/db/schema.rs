//! SQL DDL for initializing the database schema.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema:
/// - `users`, `api_keys`: tenant identities
/// - `credentials`: pooled upstream credentials (secrets encrypted)
/// - `usage_logs`: append-only request records, RPM/daily accounting source
/// - `system_config`, `error_message_rules`: runtime-tunable behaviour
pub const SQLITE_INIT: &str = r#"
-- ---------------------------------------------------------------------------
-- Users
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY NOT NULL,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    daily_quota INTEGER NOT NULL DEFAULT 1000,
    bonus_quota INTEGER NOT NULL DEFAULT 0,
    quota_flash INTEGER NOT NULL DEFAULT 0,
    quota_pro INTEGER NOT NULL DEFAULT 0,
    quota_tier3 INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL -- RFC3339
);

-- ---------------------------------------------------------------------------
-- API keys
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS api_keys (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    key TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_used_at TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_keys_user_id ON api_keys(user_id);

-- ---------------------------------------------------------------------------
-- Pooled upstream credentials (secret columns hold vault ciphertext)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id INTEGER NULL REFERENCES users(id),
    variant TEXT NOT NULL DEFAULT 'geminicli',
    credential_kind TEXT NOT NULL DEFAULT 'oauth',
    email TEXT NULL,
    refresh_token TEXT NULL,
    access_token TEXT NULL,
    token_expiry TEXT NULL,
    client_id TEXT NULL,
    client_secret TEXT NULL,
    project_id TEXT NULL,
    model_tier TEXT NULL,
    account_class TEXT NOT NULL DEFAULT 'free',
    is_active INTEGER NOT NULL DEFAULT 1,
    is_public INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT NULL,
    last_used_flash TEXT NULL,
    last_used_pro TEXT NULL,
    last_used_tier3 TEXT NULL,
    total_requests INTEGER NOT NULL DEFAULT 0,
    failed_requests INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credentials_is_active ON credentials(is_active);
CREATE INDEX IF NOT EXISTS idx_credentials_variant ON credentials(variant);
CREATE INDEX IF NOT EXISTS idx_credentials_user_id ON credentials(user_id);
CREATE INDEX IF NOT EXISTS idx_credentials_is_public ON credentials(is_public);
CREATE INDEX IF NOT EXISTS idx_credentials_selection
    ON credentials(is_active, variant, project_id, model_tier);

-- ---------------------------------------------------------------------------
-- Usage logs (append-only: status_code=0 marks the in-flight placeholder)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS usage_logs (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    credential_id INTEGER NULL REFERENCES credentials(id),
    credential_email TEXT NULL,
    model TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    status_code INTEGER NOT NULL DEFAULT 0,
    latency_ms INTEGER NOT NULL DEFAULT 0,
    error_type TEXT NULL,
    error_code TEXT NULL,
    error_message TEXT NULL,
    cd_seconds INTEGER NULL,
    request_body TEXT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    client_ip TEXT NULL,
    user_agent TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_logs_created_at ON usage_logs(created_at);
CREATE INDEX IF NOT EXISTS idx_usage_logs_user_created ON usage_logs(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_usage_logs_status_code ON usage_logs(status_code);
CREATE INDEX IF NOT EXISTS idx_usage_logs_error_type ON usage_logs(error_type);

-- ---------------------------------------------------------------------------
-- Runtime-tunable configuration
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS system_config (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS error_message_rules (
    id INTEGER PRIMARY KEY NOT NULL,
    error_type TEXT NULL,
    keyword TEXT NULL,
    custom_message TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
);
"#;
