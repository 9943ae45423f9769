//! Credential queries. Selection is DB-query-per-call: in-memory handles are
//! short-lived values carrying the primary key, and concurrent selection of
//! the same row is tolerated because cooldowns are advisory.

use super::actor::{
    BonusDeduct, CandidateQuery, CredStatsQuery, CredentialCreate, CredentialMutation, DbActor,
    PoolScope, UserCredStats,
};
use crate::db::models::DbCredential;
use crate::error::ProxyError;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Errors stored on credential rows are clipped to keep rows small.
const LAST_ERROR_MAX_CHARS: usize = 1000;

const CREDENTIAL_COLUMNS: &str = "id, user_id, variant, credential_kind, email, refresh_token, \
     access_token, token_expiry, client_id, client_secret, project_id, model_tier, \
     account_class, is_active, is_public, last_used_at, last_used_flash, last_used_pro, \
     last_used_tier3, total_requests, failed_requests, last_error, created_at";

fn clip_error(error: &str) -> String {
    error.chars().take(LAST_ERROR_MAX_CHARS).collect()
}

impl DbActor {
    pub(super) async fn create_credential(
        &self,
        pool: &SqlitePool,
        create: CredentialCreate,
    ) -> Result<i64, ProxyError> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
        INSERT INTO credentials (
            user_id, variant, credential_kind, email, refresh_token, access_token,
            token_expiry, client_id, client_secret, project_id, model_tier,
            account_class, is_active, is_public, total_requests, failed_requests, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, 0, 0, ?)
        RETURNING id
        "#,
        )
        .bind(create.user_id)
        .bind(create.variant)
        .bind(create.credential_kind)
        .bind(create.email)
        .bind(create.refresh_token)
        .bind(create.access_token)
        .bind(create.token_expiry)
        .bind(create.client_id)
        .bind(create.client_secret)
        .bind(create.project_id)
        .bind(create.model_tier)
        .bind(create.account_class)
        .bind(create.is_public)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(id)
    }

    pub(super) async fn get_credential(
        &self,
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<DbCredential>, ProxyError> {
        let row = sqlx::query_as::<_, DbCredential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Active/variant/project/exclusion/tier/scope filters applied in SQL;
    /// rows come back least-recently-used first (never-used rows lead).
    pub(super) async fn candidates(
        &self,
        pool: &SqlitePool,
        query: CandidateQuery,
    ) -> Result<Vec<DbCredential>, ProxyError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials \
             WHERE is_active = 1 AND project_id IS NOT NULL AND project_id != '' \
             AND variant = "
        ));
        qb.push_bind(query.variant.as_str());

        if query.require_tier3 {
            qb.push(" AND model_tier = '3'");
        }

        match query.scope {
            PoolScope::OwnOnly(user_id) => {
                qb.push(" AND user_id = ");
                qb.push_bind(user_id);
            }
            PoolScope::OwnOrPublic(user_id) => {
                qb.push(" AND (is_public = 1 OR user_id = ");
                qb.push_bind(user_id);
                qb.push(")");
            }
        }

        if !query.exclude_ids.is_empty() {
            qb.push(" AND id NOT IN (");
            let mut separated = qb.separated(", ");
            for id in &query.exclude_ids {
                separated.push_bind(*id);
            }
            qb.push(")");
        }

        qb.push(" ORDER BY last_used_at ASC NULLS FIRST, id ASC");

        let rows = qb
            .build_query_as::<DbCredential>()
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub(super) async fn cred_stats(
        &self,
        pool: &SqlitePool,
        query: CredStatsQuery,
    ) -> Result<UserCredStats, ProxyError> {
        let (total, tier3, public): (i64, i64, i64) = sqlx::query_as(
            r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN model_tier = '3' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_public = 1 THEN 1 ELSE 0 END), 0)
        FROM credentials
        WHERE user_id = ? AND variant = ? AND is_active = 1
        "#,
        )
        .bind(query.user_id)
        .bind(query.variant.as_str())
        .fetch_one(pool)
        .await?;

        Ok(UserCredStats {
            total,
            tier3,
            public,
        })
    }

    pub(super) async fn mutate_credential(
        &self,
        pool: &SqlitePool,
        mutation: CredentialMutation,
    ) -> Result<(), ProxyError> {
        match mutation {
            CredentialMutation::StampUse { id, group } => {
                let now = Utc::now();
                let sql = format!(
                    "UPDATE credentials SET last_used_at = ?, {} = ?, \
                     total_requests = total_requests + 1 WHERE id = ?",
                    group.stamp_column()
                );
                sqlx::query(&sql).bind(now).bind(now).bind(id).execute(pool).await?;
            }
            CredentialMutation::GroupStamp {
                id,
                group,
                stamp,
                error,
            } => {
                let sql = format!(
                    "UPDATE credentials SET {} = ?, last_error = ?, \
                     failed_requests = failed_requests + 1 WHERE id = ?",
                    group.stamp_column()
                );
                sqlx::query(&sql)
                    .bind(stamp)
                    .bind(clip_error(&error))
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
            CredentialMutation::Failure { id, error } => {
                sqlx::query(
                    "UPDATE credentials SET failed_requests = failed_requests + 1, \
                     last_error = ? WHERE id = ?",
                )
                .bind(clip_error(&error))
                .bind(id)
                .execute(pool)
                .await?;
            }
            CredentialMutation::Disable { id } => {
                sqlx::query("UPDATE credentials SET is_active = 0 WHERE id = ?")
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
            CredentialMutation::StoreToken {
                id,
                access_token,
                expiry,
            } => {
                sqlx::query(
                    "UPDATE credentials SET access_token = ?, token_expiry = ? WHERE id = ?",
                )
                .bind(access_token)
                .bind(expiry)
                .bind(id)
                .execute(pool)
                .await?;
            }
            CredentialMutation::StoreProject { id, project_id } => {
                sqlx::query("UPDATE credentials SET project_id = ? WHERE id = ?")
                    .bind(project_id)
                    .bind(id)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Clamp-to-zero deduction of earned reward quota.
    pub(super) async fn deduct_bonus(
        &self,
        pool: &SqlitePool,
        deduct: BonusDeduct,
    ) -> Result<(), ProxyError> {
        sqlx::query(
            "UPDATE users SET bonus_quota = MAX(0, bonus_quota - ?) WHERE id = ?",
        )
        .bind(deduct.amount)
        .bind(deduct.user_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
