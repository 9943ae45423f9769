use crate::db::models::{DbCredential, DbErrorMessageRule, DbUser};
use crate::db::schema::SQLITE_INIT;
use crate::error::ProxyError;
use crate::service::pool::ModelGroup;
use crate::upstream::Variant;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::{str::FromStr, time::Duration};
use tracing::info;

/// New user row (tenant provisioning is external; tests and import tooling
/// go through this).
#[derive(Debug, Clone)]
pub struct UserCreate {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub daily_quota: i64,
}

#[derive(Debug, Clone)]
pub struct ApiKeyCreate {
    pub user_id: i64,
    pub key: String,
}

/// New credential row. Secret fields must already be vault ciphertext.
#[derive(Debug, Clone, Default)]
pub struct CredentialCreate {
    pub user_id: Option<i64>,
    pub variant: String,
    pub credential_kind: String,
    pub email: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub project_id: Option<String>,
    pub model_tier: Option<String>,
    pub account_class: String,
    pub is_public: bool,
}

/// Sharing scope applied at query time.
#[derive(Debug, Clone, Copy)]
pub enum PoolScope {
    OwnOnly(i64),
    OwnOrPublic(i64),
}

/// Candidate filter for credential selection.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub variant: Variant,
    pub require_tier3: bool,
    pub scope: PoolScope,
    pub exclude_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserCredStats {
    pub total: i64,
    pub tier3: i64,
    pub public: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CredStatsQuery {
    pub user_id: i64,
    pub variant: Variant,
}

/// Targeted credential mutations, applied one at a time.
#[derive(Debug, Clone)]
pub enum CredentialMutation {
    /// Selection stamp: `last_used_at`, the group stamp and the request
    /// counter move together.
    StampUse { id: i64, group: ModelGroup },
    /// Install a synthetic group stamp so the cooldown check expires at the
    /// upstream-provided time; records the error and bumps the failure count.
    GroupStamp {
        id: i64,
        group: ModelGroup,
        stamp: DateTime<Utc>,
        error: String,
    },
    Failure { id: i64, error: String },
    Disable { id: i64 },
    StoreToken {
        id: i64,
        access_token: String,
        expiry: DateTime<Utc>,
    },
    StoreProject { id: i64, project_id: String },
}

#[derive(Debug, Clone, Copy)]
pub struct BonusDeduct {
    pub user_id: i64,
    pub amount: i64,
}

/// In-flight usage-log placeholder payload.
#[derive(Debug, Clone)]
pub struct UsageDraft {
    pub user_id: i64,
    pub model: String,
    pub endpoint: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Finalisation payload; transitions status_code away from 0 exactly once.
#[derive(Debug, Clone, Default)]
pub struct UsageFinal {
    pub id: i64,
    pub status_code: i64,
    pub latency_ms: i64,
    pub credential_id: Option<i64>,
    pub credential_email: Option<String>,
    pub error_type: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub cd_seconds: Option<i64>,
    pub request_body: Option<String>,
    pub retry_count: i64,
}

/// Daily-quota accounting class; maps to LIKE filters on the model column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaClass {
    /// Everything that is neither pro nor tier-3.
    Flash,
    /// Pro bucket including tier-3 traffic (shared allowance).
    ProShared,
    /// Pro bucket excluding tier-3 traffic.
    ProOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct RpmWindow {
    pub user_id: i64,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DailyWindow {
    pub user_id: i64,
    pub since: DateTime<Utc>,
    pub class: QuotaClass,
}

#[derive(Debug, Clone)]
pub struct ConfigSet {
    pub key: String,
    pub value: String,
}

#[derive(Debug)]
pub enum DbActorMessage {
    CreateUser(UserCreate, RpcReplyPort<Result<i64, ProxyError>>),
    CreateApiKey(ApiKeyCreate, RpcReplyPort<Result<i64, ProxyError>>),
    CreateCredential(CredentialCreate, RpcReplyPort<Result<i64, ProxyError>>),

    /// Look up an active user by API key; refreshes the key's last_used_at.
    UserByApiKey(String, RpcReplyPort<Result<Option<DbUser>, ProxyError>>),

    CredStats(CredStatsQuery, RpcReplyPort<Result<UserCredStats, ProxyError>>),
    Candidates(CandidateQuery, RpcReplyPort<Result<Vec<DbCredential>, ProxyError>>),
    GetCredential(i64, RpcReplyPort<Result<Option<DbCredential>, ProxyError>>),
    MutateCredential(CredentialMutation, RpcReplyPort<Result<(), ProxyError>>),
    DeductBonus(BonusDeduct, RpcReplyPort<Result<(), ProxyError>>),

    InsertUsage(UsageDraft, RpcReplyPort<Result<i64, ProxyError>>),
    FinalizeUsage(UsageFinal, RpcReplyPort<Result<(), ProxyError>>),
    GetUsage(i64, RpcReplyPort<Result<Option<crate::db::models::DbUsageLog>, ProxyError>>),
    RequestsSince(RpmWindow, RpcReplyPort<Result<i64, ProxyError>>),
    /// Returns `(class_count, total_count)` since the window start.
    DailyUsage(DailyWindow, RpcReplyPort<Result<(i64, i64), ProxyError>>),

    ConfigValue(String, RpcReplyPort<Result<Option<String>, ProxyError>>),
    SetConfigValue(ConfigSet, RpcReplyPort<Result<(), ProxyError>>),
    ErrorRules(RpcReplyPort<Result<Vec<DbErrorMessageRule>, ProxyError>>),
}

#[derive(Clone)]
pub struct DbActorHandle {
    actor: ActorRef<DbActorMessage>,
}

macro_rules! db_call {
    ($self:expr, $variant:ident $(, $arg:expr)*) => {
        ractor::call!($self.actor, DbActorMessage::$variant $(, $arg)*)
            .map_err(|e| ProxyError::Ractor(format!(
                "DbActor {} RPC failed: {e}", stringify!($variant)
            )))?
    };
}

impl DbActorHandle {
    pub async fn create_user(&self, create: UserCreate) -> Result<i64, ProxyError> {
        db_call!(self, CreateUser, create)
    }

    pub async fn create_api_key(&self, create: ApiKeyCreate) -> Result<i64, ProxyError> {
        db_call!(self, CreateApiKey, create)
    }

    pub async fn create_credential(&self, create: CredentialCreate) -> Result<i64, ProxyError> {
        db_call!(self, CreateCredential, create)
    }

    pub async fn user_by_api_key(&self, key: &str) -> Result<Option<DbUser>, ProxyError> {
        db_call!(self, UserByApiKey, key.to_string())
    }

    pub async fn cred_stats(
        &self,
        user_id: i64,
        variant: Variant,
    ) -> Result<UserCredStats, ProxyError> {
        db_call!(self, CredStats, CredStatsQuery { user_id, variant })
    }

    pub async fn candidates(&self, query: CandidateQuery) -> Result<Vec<DbCredential>, ProxyError> {
        db_call!(self, Candidates, query)
    }

    pub async fn get_credential(&self, id: i64) -> Result<Option<DbCredential>, ProxyError> {
        db_call!(self, GetCredential, id)
    }

    pub async fn mutate_credential(&self, mutation: CredentialMutation) -> Result<(), ProxyError> {
        db_call!(self, MutateCredential, mutation)
    }

    pub async fn deduct_bonus(&self, user_id: i64, amount: i64) -> Result<(), ProxyError> {
        db_call!(self, DeductBonus, BonusDeduct { user_id, amount })
    }

    pub async fn insert_usage(&self, draft: UsageDraft) -> Result<i64, ProxyError> {
        db_call!(self, InsertUsage, draft)
    }

    pub async fn finalize_usage(&self, fin: UsageFinal) -> Result<(), ProxyError> {
        db_call!(self, FinalizeUsage, fin)
    }

    pub async fn get_usage(
        &self,
        id: i64,
    ) -> Result<Option<crate::db::models::DbUsageLog>, ProxyError> {
        db_call!(self, GetUsage, id)
    }

    pub async fn requests_since(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, ProxyError> {
        db_call!(self, RequestsSince, RpmWindow { user_id, since })
    }

    pub async fn daily_usage(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        class: QuotaClass,
    ) -> Result<(i64, i64), ProxyError> {
        db_call!(
            self,
            DailyUsage,
            DailyWindow {
                user_id,
                since,
                class
            }
        )
    }

    pub async fn config_value(&self, key: &str) -> Result<Option<String>, ProxyError> {
        db_call!(self, ConfigValue, key.to_string())
    }

    pub async fn set_config_value(&self, key: &str, value: &str) -> Result<(), ProxyError> {
        db_call!(
            self,
            SetConfigValue,
            ConfigSet {
                key: key.to_string(),
                value: value.to_string()
            }
        )
    }

    pub async fn error_rules(&self) -> Result<Vec<DbErrorMessageRule>, ProxyError> {
        db_call!(self, ErrorRules)
    }
}

pub(super) struct DbActorState {
    pub(super) pool: SqlitePool,
}

pub(super) struct DbActor;

#[ractor::async_trait]
impl Actor for DbActor {
    type Msg = DbActorMessage;
    type State = DbActorState;
    type Arguments = String;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        database_url: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db schema init failed: {e}")))?;

        info!("DbActor initialized");
        Ok(DbActorState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let pool = &state.pool;
        match message {
            DbActorMessage::CreateUser(create, reply) => {
                let _ = reply.send(self.create_user(pool, create).await);
            }
            DbActorMessage::CreateApiKey(create, reply) => {
                let _ = reply.send(self.create_api_key(pool, create).await);
            }
            DbActorMessage::CreateCredential(create, reply) => {
                let _ = reply.send(self.create_credential(pool, create).await);
            }
            DbActorMessage::UserByApiKey(key, reply) => {
                let _ = reply.send(self.user_by_api_key(pool, &key).await);
            }
            DbActorMessage::CredStats(query, reply) => {
                let _ = reply.send(self.cred_stats(pool, query).await);
            }
            DbActorMessage::Candidates(query, reply) => {
                let _ = reply.send(self.candidates(pool, query).await);
            }
            DbActorMessage::GetCredential(id, reply) => {
                let _ = reply.send(self.get_credential(pool, id).await);
            }
            DbActorMessage::MutateCredential(mutation, reply) => {
                let _ = reply.send(self.mutate_credential(pool, mutation).await);
            }
            DbActorMessage::DeductBonus(deduct, reply) => {
                let _ = reply.send(self.deduct_bonus(pool, deduct).await);
            }
            DbActorMessage::InsertUsage(draft, reply) => {
                let _ = reply.send(self.insert_usage(pool, draft).await);
            }
            DbActorMessage::FinalizeUsage(fin, reply) => {
                let _ = reply.send(self.finalize_usage(pool, fin).await);
            }
            DbActorMessage::GetUsage(id, reply) => {
                let _ = reply.send(self.get_usage(pool, id).await);
            }
            DbActorMessage::RequestsSince(window, reply) => {
                let _ = reply.send(self.requests_since(pool, window).await);
            }
            DbActorMessage::DailyUsage(window, reply) => {
                let _ = reply.send(self.daily_usage(pool, window).await);
            }
            DbActorMessage::ConfigValue(key, reply) => {
                let _ = reply.send(self.config_value(pool, &key).await);
            }
            DbActorMessage::SetConfigValue(set, reply) => {
                let _ = reply.send(self.set_config_value(pool, set).await);
            }
            DbActorMessage::ErrorRules(reply) => {
                let _ = reply.send(self.error_rules(pool).await);
            }
        }
        Ok(())
    }
}

/// Spawn the database actor and return a cloneable handle.
pub async fn spawn(database_url: &str) -> DbActorHandle {
    let (actor, _jh) = ractor::Actor::spawn(None, DbActor, database_url.to_string())
        .await
        .expect("failed to spawn DbActor");

    DbActorHandle { actor }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), ProxyError> {
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}
