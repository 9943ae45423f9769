//! Admin-configurable replacement of user-visible error messages.
//!
//! Rules match by error kind, by keyword substring over the raw error text,
//! or both (both must hit when both are set). Highest priority wins.

use crate::db::DbActorHandle;
use crate::db::models::DbErrorMessageRule;
use crate::error::ErrorKind;
use crate::service::settings::RuntimeSettings;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const RULES_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ErrorMessageService {
    db: DbActorHandle,
    settings: RuntimeSettings,
    rules: Cache<(), Arc<Vec<DbErrorMessageRule>>>,
}

impl ErrorMessageService {
    pub fn new(db: DbActorHandle, settings: RuntimeSettings) -> Self {
        Self {
            db,
            settings,
            rules: Cache::builder()
                .max_capacity(1)
                .time_to_live(RULES_TTL)
                .build(),
        }
    }

    async fn active_rules(&self) -> Arc<Vec<DbErrorMessageRule>> {
        if let Some(cached) = self.rules.get(&()) {
            return cached;
        }
        let fetched = match self.db.error_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("error-message rules lookup failed: {e}");
                Vec::new()
            }
        };
        let rules = Arc::new(fetched);
        self.rules.insert((), rules.clone());
        rules
    }

    /// The custom message for `(kind, raw error text)`, or `None` when the
    /// feature is off or no rule matches.
    pub async fn resolve(&self, kind: ErrorKind, error_text: &str) -> Option<String> {
        if !self.settings.custom_errors_enabled().await {
            return None;
        }
        let rules = self.active_rules().await;
        match_rule(&rules, kind, error_text).map(|rule| rule.custom_message.clone())
    }
}

/// First match over rules already ordered by priority desc.
pub fn match_rule<'a>(
    rules: &'a [DbErrorMessageRule],
    kind: ErrorKind,
    error_text: &str,
) -> Option<&'a DbErrorMessageRule> {
    let text_lower = error_text.to_lowercase();

    rules.iter().filter(|rule| rule.is_active).find(|rule| {
        match (&rule.keyword, &rule.error_type) {
            (Some(keyword), Some(error_type)) => {
                text_lower.contains(&keyword.to_lowercase()) && error_type == kind.as_str()
            }
            (Some(keyword), None) => text_lower.contains(&keyword.to_lowercase()),
            (None, Some(error_type)) => error_type == kind.as_str(),
            (None, None) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(
        id: i64,
        error_type: Option<&str>,
        keyword: Option<&str>,
        message: &str,
        priority: i64,
    ) -> DbErrorMessageRule {
        DbErrorMessageRule {
            id,
            error_type: error_type.map(str::to_string),
            keyword: keyword.map(str::to_string),
            custom_message: message.to_string(),
            priority,
            is_active: true,
        }
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let rules = vec![rule(1, None, Some("Quota"), "quota msg", 10)];
        let hit = match_rule(&rules, ErrorKind::Unknown, "QUOTA exceeded for project");
        assert_eq!(hit.unwrap().custom_message, "quota msg");
    }

    #[test]
    fn both_set_requires_both() {
        let rules = vec![rule(1, Some("RATE_LIMIT"), Some("per day"), "daily", 10)];
        assert!(match_rule(&rules, ErrorKind::RateLimit, "limit per day").is_some());
        assert!(match_rule(&rules, ErrorKind::AuthError, "limit per day").is_none());
        assert!(match_rule(&rules, ErrorKind::RateLimit, "per minute").is_none());
    }

    #[test]
    fn kind_only_rule_matches_kind() {
        let rules = vec![rule(1, Some("NO_CREDENTIAL"), None, "no creds", 0)];
        assert!(match_rule(&rules, ErrorKind::NoCredential, "whatever").is_some());
        assert!(match_rule(&rules, ErrorKind::Timeout, "whatever").is_none());
    }

    #[test]
    fn first_rule_in_priority_order_wins() {
        // Rules arrive pre-sorted by priority desc.
        let rules = vec![
            rule(2, None, Some("error"), "high", 10),
            rule(1, None, Some("error"), "low", 1),
        ];
        assert_eq!(
            match_rule(&rules, ErrorKind::Unknown, "some error").unwrap().custom_message,
            "high"
        );
    }

    #[test]
    fn rule_with_neither_field_never_matches() {
        let rules = vec![rule(1, None, None, "noop", 100)];
        assert!(match_rule(&rules, ErrorKind::Unknown, "anything").is_none());
    }
}
