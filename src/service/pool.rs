//! Pooled credential selection, cooldown bookkeeping and failure handling.
//!
//! Cooldowns are stored stamps, not timers: a credential is cooling for group
//! `g` iff `now - last_used[g] < cd_g`. The check is pure arithmetic, which
//! keeps the scheme crash-safe and shardable.

use crate::config::{PolicyConfig, PoolMode};
use crate::db::{CandidateQuery, CredentialMutation, DbActorHandle, PoolScope};
use crate::db::models::DbCredential;
use crate::error::ProxyError;
use crate::service::settings::RuntimeSettings;
use crate::upstream::Variant;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{info, warn};

/// Substring marking tier-3 models in client-facing names.
const TIER3_MARKER: &str = "gemini-3-";

/// Default cooldown when an upstream 429 carries no parsable delay.
const DEFAULT_RATE_LIMIT_SECONDS: i64 = 60;

/// Cooldown bucket per model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelGroup {
    Flash,
    Pro,
    Tier3,
}

impl ModelGroup {
    /// Bucket for a (prefix-stripped or raw) model name.
    pub fn of(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains(TIER3_MARKER) {
            ModelGroup::Tier3
        } else if lower.contains("pro") {
            ModelGroup::Pro
        } else {
            ModelGroup::Flash
        }
    }

    /// Credential column holding this group's cooldown stamp.
    pub fn stamp_column(self) -> &'static str {
        match self {
            ModelGroup::Flash => "last_used_flash",
            ModelGroup::Pro => "last_used_pro",
            ModelGroup::Tier3 => "last_used_tier3",
        }
    }

    pub fn stamp_of(self, cred: &DbCredential) -> Option<DateTime<Utc>> {
        match self {
            ModelGroup::Flash => cred.last_used_flash,
            ModelGroup::Pro => cred.last_used_pro,
            ModelGroup::Tier3 => cred.last_used_tier3,
        }
    }
}

/// Tier-3 models must only be served by tier-3 credentials.
pub fn requires_tier3(model: &str) -> bool {
    model.to_lowercase().contains(TIER3_MARKER)
}

static RETRY_DELAY_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""retryDelay"\s*:\s*"(\d+)s?""#).expect("pattern compiles"));
static RETRY_AFTER_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)retry\s+after\s+(\d+)\s*s").expect("pattern compiles"));
static SECONDS_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*seconds?").expect("pattern compiles"));

/// Parse the cooldown a 429 asks for: `Retry-After` header first, then the
/// structured `retryDelay` field, then prose forms. 0 when nothing matches.
pub fn parse_retry_delay(error_text: &str, retry_after_header: Option<&str>) -> i64 {
    if let Some(value) = retry_after_header
        && let Ok(seconds) = value.trim().parse::<i64>()
    {
        return seconds;
    }
    for pattern in [&*RETRY_DELAY_JSON, &*RETRY_AFTER_TEXT, &*SECONDS_TEXT] {
        if let Some(cap) = pattern.captures(error_text)
            && let Ok(seconds) = cap[1].parse::<i64>()
        {
            return seconds;
        }
    }
    0
}

/// Whether the credential is cooling for `group` under a `cd_seconds` window.
pub fn in_cooldown(
    cred: &DbCredential,
    group: ModelGroup,
    cd_seconds: i64,
    now: DateTime<Utc>,
) -> bool {
    if cd_seconds <= 0 {
        return false;
    }
    match group.stamp_of(cred) {
        Some(last_used) => now < last_used + Duration::seconds(cd_seconds),
        None => false,
    }
}

/// Pick from an LRU-ordered candidate list: first credential not in cooldown,
/// else fail open to the least-recently-used one.
pub fn choose_candidate(
    candidates: &[DbCredential],
    group: ModelGroup,
    cd_seconds: i64,
    now: DateTime<Utc>,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    candidates
        .iter()
        .position(|cred| !in_cooldown(cred, group, cd_seconds, now))
        .or(Some(0))
}

#[derive(Clone)]
pub struct CredentialPool {
    db: DbActorHandle,
    settings: RuntimeSettings,
    policy: PolicyConfig,
}

impl CredentialPool {
    pub fn new(db: DbActorHandle, settings: RuntimeSettings, policy: PolicyConfig) -> Self {
        Self {
            db,
            settings,
            policy,
        }
    }

    pub fn cd_seconds(&self, group: ModelGroup) -> i64 {
        match group {
            ModelGroup::Flash => self.policy.cd_flash,
            ModelGroup::Pro => self.policy.cd_pro,
            ModelGroup::Tier3 => self.policy.cd_tier3,
        }
    }

    /// Select a credential for `model`, excluding ids already tried this
    /// request. Stamps `last_used_at`, the group stamp and the request
    /// counter before returning.
    pub async fn acquire(
        &self,
        user_id: i64,
        model: &str,
        exclude_ids: &[i64],
        variant: Variant,
    ) -> Result<Option<DbCredential>, ProxyError> {
        let require_tier3 = requires_tier3(model);
        let scope = self.sharing_scope(user_id, require_tier3, variant).await?;

        let candidates = self
            .db
            .candidates(CandidateQuery {
                variant,
                require_tier3,
                scope,
                exclude_ids: exclude_ids.to_vec(),
            })
            .await?;

        let group = ModelGroup::of(model);
        let cd = self.cd_seconds(group);
        let now = Utc::now();
        let Some(index) = choose_candidate(&candidates, group, cd, now) else {
            return Ok(None);
        };
        let available = candidates
            .iter()
            .filter(|c| !in_cooldown(c, group, cd, now))
            .count();
        let chosen = candidates[index].clone();
        info!(
            variant = %variant,
            group = ?group,
            cred.id = chosen.id,
            available,
            total = candidates.len(),
            "credential selected"
        );

        self.db
            .mutate_credential(CredentialMutation::StampUse {
                id: chosen.id,
                group,
            })
            .await?;

        Ok(Some(chosen))
    }

    /// Resolve the sharing scope for this user under the active pool mode.
    async fn sharing_scope(
        &self,
        user_id: i64,
        require_tier3: bool,
        variant: Variant,
    ) -> Result<PoolScope, ProxyError> {
        let mode = self.settings.pool_mode(self.policy.pool_mode).await;
        let scope = match mode {
            PoolMode::Private => PoolScope::OwnOnly(user_id),
            PoolMode::Tier3Shared => {
                if require_tier3 {
                    let stats = self.db.cred_stats(user_id, variant).await?;
                    if stats.tier3 > 0 {
                        PoolScope::OwnOrPublic(user_id)
                    } else {
                        PoolScope::OwnOnly(user_id)
                    }
                } else {
                    PoolScope::OwnOrPublic(user_id)
                }
            }
            PoolMode::FullShared => {
                // Donor check: any active public credential of this variant
                // opens the whole public pool, tier-agnostic.
                let stats = self.db.cred_stats(user_id, variant).await?;
                if stats.public > 0 {
                    PoolScope::OwnOrPublic(user_id)
                } else {
                    PoolScope::OwnOnly(user_id)
                }
            }
        };
        Ok(scope)
    }

    /// Record a failed call. Auth failures disable the credential and claw
    /// back the owner's reward quota when the credential was donated.
    pub async fn handle_failure(
        &self,
        cred: &DbCredential,
        error: &str,
    ) -> Result<(), ProxyError> {
        self.db
            .mutate_credential(CredentialMutation::Failure {
                id: cred.id,
                error: error.to_string(),
            })
            .await?;

        let is_auth_failure =
            error.contains("401") || error.contains("403") || error.contains("PERMISSION_DENIED");
        if !is_auth_failure || !cred.is_active {
            return Ok(());
        }

        warn!(cred.id = cred.id, "credential disabled after auth failure");
        self.db
            .mutate_credential(CredentialMutation::Disable { id: cred.id })
            .await?;

        if cred.is_public && let Some(owner) = cred.user_id {
            let mut deduct = self.policy.flash_per_cred + self.policy.pro_per_cred;
            if cred.is_tier3() {
                deduct += self.policy.tier3_per_cred;
            }
            self.db.deduct_bonus(owner, deduct).await?;
            info!(
                user_id = owner,
                amount = deduct,
                "reward quota deducted for dead public credential"
            );
        }
        Ok(())
    }

    /// Install the upstream-requested cooldown after a 429. The stored stamp
    /// is shifted so that the normal `last_used[g] + cd_g` check expires at
    /// `now + delay`. Returns the delay for logging.
    pub async fn handle_rate_limit(
        &self,
        cred: &DbCredential,
        model: &str,
        error_text: &str,
        retry_after_header: Option<&str>,
    ) -> Result<i64, ProxyError> {
        let mut delay = parse_retry_delay(error_text, retry_after_header);
        if delay <= 0 {
            delay = DEFAULT_RATE_LIMIT_SECONDS;
        }

        let group = ModelGroup::of(model);
        let config_cd = self.cd_seconds(group);
        let now = Utc::now();
        let stamp = if config_cd > 0 {
            now + Duration::seconds(delay) - Duration::seconds(config_cd)
        } else {
            now
        };

        let preview: String = error_text.chars().take(300).collect();
        self.db
            .mutate_credential(CredentialMutation::GroupStamp {
                id: cred.id,
                group,
                stamp,
                error: format!("429 rate limited, cd {delay}s ({group:?}) - {preview}"),
            })
            .await?;

        info!(cred.id = cred.id, group = ?group, delay, "rate-limit cooldown installed");
        Ok(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cred(id: i64, flash_stamp: Option<DateTime<Utc>>) -> DbCredential {
        DbCredential {
            id,
            user_id: Some(1),
            variant: "geminicli".to_string(),
            credential_kind: "oauth".to_string(),
            email: None,
            refresh_token: None,
            access_token: None,
            token_expiry: None,
            client_id: None,
            client_secret: None,
            project_id: Some("p".to_string()),
            model_tier: None,
            account_class: "free".to_string(),
            is_active: true,
            is_public: false,
            last_used_at: flash_stamp,
            last_used_flash: flash_stamp,
            last_used_pro: None,
            last_used_tier3: None,
            total_requests: 0,
            failed_requests: 0,
            last_error: None,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn model_groups() {
        assert_eq!(ModelGroup::of("gemini-2.5-flash"), ModelGroup::Flash);
        assert_eq!(ModelGroup::of("gemini-2.5-pro"), ModelGroup::Pro);
        assert_eq!(ModelGroup::of("gemini-3-pro-preview"), ModelGroup::Tier3);
        assert_eq!(ModelGroup::of("gemini-3-flash"), ModelGroup::Tier3);
        assert_eq!(ModelGroup::of(""), ModelGroup::Flash);
    }

    #[test]
    fn tier3_requirement() {
        assert!(requires_tier3("gemini-3-pro-preview"));
        assert!(!requires_tier3("gemini-2.5-pro"));
        assert!(!requires_tier3("claude-sonnet-4-5"));
    }

    #[test]
    fn retry_delay_sources_in_priority_order() {
        assert_eq!(parse_retry_delay("", Some("45")), 45);
        assert_eq!(parse_retry_delay(r#"{"retryDelay": "30s"}"#, None), 30);
        assert_eq!(parse_retry_delay("please retry after 15 seconds", None), 15);
        assert_eq!(parse_retry_delay("wait 20 seconds", None), 20);
        assert_eq!(parse_retry_delay("no delay here", None), 0);
    }

    #[test]
    fn header_wins_over_body() {
        assert_eq!(
            parse_retry_delay(r#"{"retryDelay": "30s"}"#, Some("45")),
            45
        );
    }

    #[test]
    fn cooldown_window_arithmetic() {
        let now = Utc::now();
        let fresh = cred(1, Some(now - Duration::seconds(5)));
        let stale = cred(2, Some(now - Duration::seconds(30)));
        assert!(in_cooldown(&fresh, ModelGroup::Flash, 10, now));
        assert!(!in_cooldown(&stale, ModelGroup::Flash, 10, now));
        assert!(!in_cooldown(&fresh, ModelGroup::Flash, 0, now));
        assert!(!in_cooldown(&cred(3, None), ModelGroup::Flash, 10, now));
    }

    #[test]
    fn choose_prefers_first_available() {
        let now = Utc::now();
        let cooling = cred(1, Some(now));
        let ready = cred(2, Some(now - Duration::seconds(120)));
        assert_eq!(
            choose_candidate(&[cooling.clone(), ready], ModelGroup::Flash, 60, now),
            Some(1)
        );
    }

    #[test]
    fn choose_fails_open_when_all_cooling() {
        let now = Utc::now();
        let a = cred(1, Some(now));
        let b = cred(2, Some(now));
        assert_eq!(
            choose_candidate(&[a, b], ModelGroup::Flash, 60, now),
            Some(0)
        );
        assert_eq!(choose_candidate(&[], ModelGroup::Flash, 60, now), None);
    }

    #[test]
    fn synthetic_stamp_expires_at_requested_time() {
        // handle_rate_limit stores stamp = now + delay - cd; the normal check
        // then sees the cooldown end at now + delay.
        let now = Utc::now();
        let delay = 45i64;
        let cd = 10i64;
        let stamp = now + Duration::seconds(delay) - Duration::seconds(cd);
        let c = cred(1, Some(stamp));
        assert!(in_cooldown(&c, ModelGroup::Flash, cd, now));
        assert!(in_cooldown(
            &c,
            ModelGroup::Flash,
            cd,
            now + Duration::seconds(delay - 1)
        ));
        assert!(!in_cooldown(
            &c,
            ModelGroup::Flash,
            cd,
            now + Duration::seconds(delay + 1)
        ));
    }
}
