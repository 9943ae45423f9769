//! Per-user quota and rate-limit enforcement.
//!
//! The usage-log table is the authoritative counter. The guard runs after the
//! in-flight placeholder row is inserted, so every window count includes the
//! current request; limits therefore reject on `count > limit`.

use crate::config::PolicyConfig;
use crate::db::{DbActorHandle, QuotaClass};
use crate::db::models::DbUser;
use crate::error::ProxyError;
use crate::service::pool::requires_tier3;
use crate::upstream::Variant;
use chrono::{DateTime, Duration, Timelike, Utc};

/// The accounting day rolls over at 07:00 UTC (15:00 CST).
pub const DAY_RESET_HOUR_UTC: u32 = 7;

/// Start of the current accounting day.
pub fn day_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let reset = now
        .with_hour(DAY_RESET_HOUR_UTC)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("07:00:00 is a valid time of day");
    if now < reset {
        reset - Duration::days(1)
    } else {
        reset
    }
}

/// Effective per-class daily limits for one user, computed at read time from
/// credential counts, per-user overrides and the no-credential floors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveQuotas {
    pub flash: i64,
    pub pro: i64,
    pub has_credential: bool,
    pub has_tier3_access: bool,
}

pub fn effective_quotas(
    user: &DbUser,
    total_creds: i64,
    tier3_creds: i64,
    policy: &PolicyConfig,
) -> EffectiveQuotas {
    let has_credential = total_creds > 0;

    let flash = if user.quota_flash > 0 {
        user.quota_flash
    } else if has_credential {
        total_creds * policy.flash_per_cred
    } else {
        policy.no_cred_flash
    };

    // Pro and tier-3 draw from one shared bucket; tier-3 ownership upgrades
    // its size.
    let pro = if user.quota_pro > 0 {
        user.quota_pro
    } else if tier3_creds > 0 {
        tier3_creds * policy.tier3_per_cred
    } else if has_credential {
        total_creds * policy.pro_per_cred
    } else {
        policy.no_cred_pro
    };

    EffectiveQuotas {
        flash,
        pro,
        has_credential,
        has_tier3_access: tier3_creds > 0 || user.quota_tier3 > 0,
    }
}

#[derive(Clone)]
pub struct QuotaGuard {
    db: DbActorHandle,
    policy: PolicyConfig,
}

impl QuotaGuard {
    pub fn new(db: DbActorHandle, policy: PolicyConfig) -> Self {
        Self { db, policy }
    }

    /// Enforce RPM, tier-3 eligibility and daily buckets for one request.
    /// `model` is the client-facing model string as stored on the log row.
    pub async fn check(
        &self,
        user: &DbUser,
        model: &str,
        variant: Variant,
    ) -> Result<(), ProxyError> {
        let now = Utc::now();
        let stats = self.db.cred_stats(user.id, variant).await?;

        // 1. RPM over the trailing minute, donors get the higher ceiling.
        let rpm_limit = if stats.public > 0 {
            self.policy.contributor_rpm
        } else {
            self.policy.base_rpm
        };
        let recent = self
            .db
            .requests_since(user.id, now - Duration::seconds(60))
            .await?;
        if recent > rpm_limit {
            return Err(ProxyError::RateLimited(format!(
                "Request rate limit reached ({rpm_limit}/min)"
            )));
        }

        let quotas = effective_quotas(user, stats.total, stats.tier3, &self.policy);
        let lower = model.to_lowercase();
        let tier3_request = requires_tier3(&lower);

        // 2. Tier-3 eligibility.
        if tier3_request && !quotas.has_tier3_access {
            return Err(ProxyError::Forbidden(
                "No tier-3 model quota".to_string(),
            ));
        }

        // 3. Daily class bucket + total.
        let (class, limit, label) = if tier3_request {
            (QuotaClass::ProShared, quotas.pro, "pro (2.5-pro + tier-3 shared)")
        } else if lower.contains("pro") {
            if quotas.has_tier3_access {
                (QuotaClass::ProShared, quotas.pro, "pro (2.5-pro + tier-3 shared)")
            } else {
                (QuotaClass::ProOnly, quotas.pro, "2.5-pro")
            }
        } else {
            (QuotaClass::Flash, quotas.flash, "flash")
        };

        if limit > 0 || quotas.has_credential {
            let (class_count, total) = self
                .db
                .daily_usage(user.id, day_window_start(now), class)
                .await?;

            if limit > 0 && class_count > limit {
                return Err(ProxyError::QuotaExhausted(format!(
                    "Daily {label} quota reached ({class_count}/{limit})"
                )));
            }

            let total_limit = user.daily_quota + user.bonus_quota.max(0);
            if quotas.has_credential && total > total_limit {
                return Err(ProxyError::QuotaExhausted(
                    "Daily total quota reached".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(quota_flash: i64, quota_pro: i64, quota_tier3: i64) -> DbUser {
        DbUser {
            id: 1,
            username: "u".to_string(),
            password_hash: String::new(),
            is_admin: false,
            is_active: true,
            daily_quota: 1000,
            bonus_quota: 0,
            quota_flash,
            quota_pro,
            quota_tier3,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    fn policy() -> PolicyConfig {
        PolicyConfig::default()
    }

    #[test]
    fn day_window_rolls_at_seven_utc() {
        let before = Utc.with_ymd_and_hms(2025, 3, 10, 6, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 10, 7, 1, 0).unwrap();
        assert_eq!(
            day_window_start(before),
            Utc.with_ymd_and_hms(2025, 3, 9, 7, 0, 0).unwrap()
        );
        assert_eq!(
            day_window_start(after),
            Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn override_beats_computed_quota() {
        let q = effective_quotas(&user(42, 0, 0), 3, 0, &policy());
        assert_eq!(q.flash, 42);
        assert_eq!(q.pro, 3 * policy().pro_per_cred);
    }

    #[test]
    fn per_credential_scaling() {
        let q = effective_quotas(&user(0, 0, 0), 2, 0, &policy());
        assert_eq!(q.flash, 2 * policy().flash_per_cred);
        assert_eq!(q.pro, 2 * policy().pro_per_cred);
        assert!(q.has_credential);
        assert!(!q.has_tier3_access);
    }

    #[test]
    fn tier3_credentials_upgrade_pro_bucket() {
        let q = effective_quotas(&user(0, 0, 0), 3, 2, &policy());
        assert_eq!(q.pro, 2 * policy().tier3_per_cred);
        assert!(q.has_tier3_access);
    }

    #[test]
    fn no_credentials_fall_back_to_floor() {
        let q = effective_quotas(&user(0, 0, 0), 0, 0, &policy());
        assert_eq!(q.flash, policy().no_cred_flash);
        assert_eq!(q.pro, policy().no_cred_pro);
        assert!(!q.has_credential);
    }

    #[test]
    fn quota_tier3_override_grants_access_without_credentials() {
        let q = effective_quotas(&user(0, 0, 50), 0, 0, &policy());
        assert!(q.has_tier3_access);
    }
}
