//! Read-mostly runtime settings backed by the `system_config` table.
//!
//! Admin-side updates land in the DB; a short TTL cache makes them visible to
//! subsequent requests without a restart while keeping the hot path off the
//! database.

use crate::config::PoolMode;
use crate::db::DbActorHandle;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const SETTINGS_TTL: Duration = Duration::from_secs(30);

pub const POOL_MODE_KEY: &str = "credential_pool_mode";
pub const CUSTOM_ERRORS_KEY: &str = "custom_error_messages_enabled";

#[derive(Clone)]
pub struct RuntimeSettings {
    db: DbActorHandle,
    cache: Cache<&'static str, Arc<Option<String>>>,
}

impl RuntimeSettings {
    pub fn new(db: DbActorHandle) -> Self {
        Self {
            db,
            cache: Cache::builder()
                .max_capacity(16)
                .time_to_live(SETTINGS_TTL)
                .build(),
        }
    }

    async fn value(&self, key: &'static str) -> Arc<Option<String>> {
        if let Some(cached) = self.cache.get(key) {
            return cached;
        }
        let fetched = match self.db.config_value(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("system_config lookup for {key} failed: {e}");
                None
            }
        };
        let value = Arc::new(fetched);
        self.cache.insert(key, value.clone());
        value
    }

    /// Active pool mode: DB override when present and valid, else the
    /// configured default.
    pub async fn pool_mode(&self, default: PoolMode) -> PoolMode {
        match self.value(POOL_MODE_KEY).await.as_deref() {
            Some("private") => PoolMode::Private,
            Some("tier3_shared") => PoolMode::Tier3Shared,
            Some("full_shared") => PoolMode::FullShared,
            _ => default,
        }
    }

    /// Whether admin-configured error-message rules apply.
    pub async fn custom_errors_enabled(&self) -> bool {
        self.value(CUSTOM_ERRORS_KEY).await.as_deref() == Some("true")
    }
}
