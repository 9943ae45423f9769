//! Users, API keys, usage logs and runtime-tunable configuration.
//!
//! The usage-log table doubles as the RPM/daily accounting source: the
//! in-flight placeholder row is inserted before any upstream call, so the
//! minute window counting always includes the current request.

use super::actor::{
    ApiKeyCreate, ConfigSet, DailyWindow, DbActor, QuotaClass, RpmWindow, UsageDraft, UsageFinal,
    UserCreate,
};
use crate::db::models::{DbErrorMessageRule, DbUser};
use crate::error::ProxyError;
use chrono::Utc;
use sqlx::SqlitePool;

impl DbActor {
    pub(super) async fn create_user(
        &self,
        pool: &SqlitePool,
        create: UserCreate,
    ) -> Result<i64, ProxyError> {
        let id: i64 = sqlx::query_scalar(
            r#"
        INSERT INTO users (username, password_hash, is_admin, is_active, daily_quota, created_at)
        VALUES (?, ?, ?, 1, ?, ?)
        RETURNING id
        "#,
        )
        .bind(create.username)
        .bind(create.password_hash)
        .bind(create.is_admin)
        .bind(create.daily_quota)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    pub(super) async fn create_api_key(
        &self,
        pool: &SqlitePool,
        create: ApiKeyCreate,
    ) -> Result<i64, ProxyError> {
        let id: i64 = sqlx::query_scalar(
            r#"
        INSERT INTO api_keys (user_id, key, is_active, created_at)
        VALUES (?, ?, 1, ?)
        RETURNING id
        "#,
        )
        .bind(create.user_id)
        .bind(create.key)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    pub(super) async fn user_by_api_key(
        &self,
        pool: &SqlitePool,
        key: &str,
    ) -> Result<Option<DbUser>, ProxyError> {
        let row = sqlx::query_as::<_, DbUser>(
            r#"
        SELECT u.id, u.username, u.password_hash, u.is_admin, u.is_active, u.daily_quota,
               u.bonus_quota, u.quota_flash, u.quota_pro, u.quota_tier3, u.created_at
        FROM users u
        JOIN api_keys k ON k.user_id = u.id
        WHERE k.key = ? AND k.is_active = 1
        "#,
        )
        .bind(key)
        .fetch_optional(pool)
        .await?;

        if row.is_some() {
            sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE key = ?")
                .bind(Utc::now())
                .bind(key)
                .execute(pool)
                .await?;
        }

        Ok(row)
    }

    pub(super) async fn insert_usage(
        &self,
        pool: &SqlitePool,
        draft: UsageDraft,
    ) -> Result<i64, ProxyError> {
        let id: i64 = sqlx::query_scalar(
            r#"
        INSERT INTO usage_logs (
            user_id, model, endpoint, status_code, latency_ms, retry_count,
            client_ip, user_agent, created_at
        )
        VALUES (?, ?, ?, 0, 0, 0, ?, ?, ?)
        RETURNING id
        "#,
        )
        .bind(draft.user_id)
        .bind(draft.model)
        .bind(draft.endpoint)
        .bind(draft.client_ip)
        .bind(draft.user_agent)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    /// The `status_code = 0` guard makes the placeholder transition
    /// exactly-once; a second finalisation is a no-op.
    pub(super) async fn finalize_usage(
        &self,
        pool: &SqlitePool,
        fin: UsageFinal,
    ) -> Result<(), ProxyError> {
        sqlx::query(
            r#"
        UPDATE usage_logs SET
            status_code = ?, latency_ms = ?, credential_id = ?, credential_email = ?,
            error_type = ?, error_code = ?, error_message = ?, cd_seconds = ?,
            request_body = ?, retry_count = ?
        WHERE id = ? AND status_code = 0
        "#,
        )
        .bind(fin.status_code)
        .bind(fin.latency_ms)
        .bind(fin.credential_id)
        .bind(fin.credential_email)
        .bind(fin.error_type)
        .bind(fin.error_code)
        .bind(fin.error_message)
        .bind(fin.cd_seconds)
        .bind(fin.request_body)
        .bind(fin.retry_count)
        .bind(fin.id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub(super) async fn get_usage(
        &self,
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<crate::db::models::DbUsageLog>, ProxyError> {
        let row = sqlx::query_as::<_, crate::db::models::DbUsageLog>(
            r#"
        SELECT id, user_id, credential_id, credential_email, model, endpoint, status_code,
               latency_ms, error_type, error_code, error_message, cd_seconds, request_body,
               retry_count, client_ip, user_agent, created_at
        FROM usage_logs WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub(super) async fn requests_since(
        &self,
        pool: &SqlitePool,
        window: RpmWindow,
    ) -> Result<i64, ProxyError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usage_logs WHERE user_id = ? AND created_at >= ?",
        )
        .bind(window.user_id)
        .bind(window.since)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub(super) async fn daily_usage(
        &self,
        pool: &SqlitePool,
        window: DailyWindow,
    ) -> Result<(i64, i64), ProxyError> {
        // Class membership is decided by LIKE patterns over the stored
        // (variant-prefixed) model string.
        let class_predicate = match window.class {
            QuotaClass::Flash => "(model NOT LIKE '%pro%' AND model NOT LIKE '%3%')",
            QuotaClass::ProShared => "(model LIKE '%pro%' OR model LIKE '%3%')",
            QuotaClass::ProOnly => "model LIKE '%pro%'",
        };
        let sql = format!(
            "SELECT \
                COALESCE(SUM(CASE WHEN {class_predicate} THEN 1 ELSE 0 END), 0), \
                COUNT(*) \
             FROM usage_logs WHERE user_id = ? AND created_at >= ?"
        );

        let (class_count, total): (i64, i64) = sqlx::query_as(&sql)
            .bind(window.user_id)
            .bind(window.since)
            .fetch_one(pool)
            .await?;
        Ok((class_count, total))
    }

    pub(super) async fn config_value(
        &self,
        pool: &SqlitePool,
        key: &str,
    ) -> Result<Option<String>, ProxyError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM system_config WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await?;
        Ok(value)
    }

    pub(super) async fn set_config_value(
        &self,
        pool: &SqlitePool,
        set: ConfigSet,
    ) -> Result<(), ProxyError> {
        sqlx::query(
            r#"
        INSERT INTO system_config (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        )
        .bind(set.key)
        .bind(set.value)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub(super) async fn error_rules(
        &self,
        pool: &SqlitePool,
    ) -> Result<Vec<DbErrorMessageRule>, ProxyError> {
        let rows = sqlx::query_as::<_, DbErrorMessageRule>(
            r#"
        SELECT id, error_type, keyword, custom_message, priority, is_active
        FROM error_message_rules
        WHERE is_active = 1
        ORDER BY priority DESC, id ASC
        "#,
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
