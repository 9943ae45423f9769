//! OAuth access-token management for pooled credentials.
//!
//! Refresh is a plain `grant_type=refresh_token` form POST. Client pair
//! selection order: credential-local pair, then the variant-specific pair
//! (Antigravity carries its own), then the variant-agnostic default.

use crate::config::ResolvedUpstreams;
use crate::db::models::DbCredential;
use crate::db::{CredentialMutation, DbActorHandle};
use crate::error::ProxyError;
use crate::upstream::{GOOGLE_TOKEN_URI, Variant};
use crate::vault::CryptoVault;
use chrono::{Duration, Utc};
use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{info, warn};

/// Cached tokens are treated as expired this close to their recorded expiry.
const EXPIRY_SKEW_MINUTES: i64 = 5;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    db: DbActorHandle,
    vault: CryptoVault,
    upstreams: Arc<ResolvedUpstreams>,
    /// Process-wide ceiling on refresh POSTs.
    limiter: Arc<DirectLimiter>,
}

impl TokenRefresher {
    pub fn new(
        client: reqwest::Client,
        db: DbActorHandle,
        vault: CryptoVault,
        upstreams: Arc<ResolvedUpstreams>,
    ) -> Self {
        let tps = NonZeroU32::new(upstreams.oauth_tps.max(1)).expect("max(1) is non-zero");
        Self {
            client,
            db,
            vault,
            upstreams,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(tps))),
        }
    }

    /// Whether the stored access token needs a refresh before use.
    pub fn is_token_expired(cred: &DbCredential) -> bool {
        if cred.access_token.as_deref().is_none_or(str::is_empty) {
            return true;
        }
        match cred.token_expiry {
            Some(expiry) => expiry - Duration::minutes(EXPIRY_SKEW_MINUTES) <= Utc::now(),
            // No recorded expiry: refresh every time (conservative).
            None => true,
        }
    }

    /// A usable plaintext access token for this credential, refreshing and
    /// persisting when the cached one is stale. Concurrent refreshes for the
    /// same credential are tolerated; the last write wins and both tokens are
    /// valid.
    pub async fn access_token(
        &self,
        cred: &DbCredential,
        variant: Variant,
    ) -> Result<String, ProxyError> {
        if cred.credential_kind != "oauth" {
            let key = self.vault.decrypt(cred.access_token.as_deref());
            if key.is_empty() {
                return Err(ProxyError::TokenRefresh(format!(
                    "credential {} has no stored API key",
                    cred.id
                )));
            }
            return Ok(key);
        }

        if !Self::is_token_expired(cred) {
            let cached = self.vault.decrypt(cred.access_token.as_deref());
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        match self.refresh(cred, variant).await {
            Ok(token) => Ok(token),
            Err(e) => {
                // Refresh failed; the previous token may still have life left.
                let stale = self.vault.decrypt(cred.access_token.as_deref());
                if stale.is_empty() {
                    Err(e)
                } else {
                    warn!(cred.id = cred.id, "token refresh failed, reusing stored token: {e}");
                    Ok(stale)
                }
            }
        }
    }

    async fn refresh(&self, cred: &DbCredential, variant: Variant) -> Result<String, ProxyError> {
        let refresh_token = self.vault.decrypt(cred.refresh_token.as_deref());
        if refresh_token.is_empty() {
            return Err(ProxyError::TokenRefresh(format!(
                "credential {} has no refresh token",
                cred.id
            )));
        }

        let (client_id, client_secret) = self.client_pair(cred, variant);

        self.limiter.until_ready().await;

        let response = self
            .client
            .post(GOOGLE_TOKEN_URI)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: TokenResponse = response.json().await?;

        let Some(access_token) = body.access_token else {
            return Err(ProxyError::TokenRefresh(format!(
                "token endpoint returned {status}: {} - {}",
                body.error.unwrap_or_else(|| "unknown".to_string()),
                body.error_description.unwrap_or_default()
            )));
        };

        let expiry = Utc::now() + Duration::seconds(body.expires_in.unwrap_or(3600));
        self.db
            .mutate_credential(CredentialMutation::StoreToken {
                id: cred.id,
                access_token: self.vault.encrypt(&access_token),
                expiry,
            })
            .await?;
        info!(cred.id = cred.id, "access token refreshed");

        Ok(access_token)
    }

    /// Credential-local pair first, then variant-specific, then default.
    fn client_pair(&self, cred: &DbCredential, variant: Variant) -> (String, String) {
        let local_id = self.vault.decrypt(cred.client_id.as_deref());
        let local_secret = self.vault.decrypt(cred.client_secret.as_deref());
        if !local_id.is_empty() && !local_secret.is_empty() {
            return (local_id, local_secret);
        }

        match variant {
            Variant::Antigravity => (
                self.upstreams.antigravity_oauth_client_id.clone(),
                self.upstreams.antigravity_oauth_client_secret.clone(),
            ),
            Variant::GeminiCli => (
                self.upstreams.default_oauth_client_id.clone(),
                self.upstreams.default_oauth_client_secret.clone(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn oauth_cred(
        access_token: Option<&str>,
        expiry: Option<chrono::DateTime<Utc>>,
    ) -> DbCredential {
        DbCredential {
            id: 1,
            user_id: Some(1),
            variant: "geminicli".to_string(),
            credential_kind: "oauth".to_string(),
            email: None,
            refresh_token: Some("enc:xxx".to_string()),
            access_token: access_token.map(str::to_string),
            token_expiry: expiry,
            client_id: None,
            client_secret: None,
            project_id: Some("p".to_string()),
            model_tier: None,
            account_class: "free".to_string(),
            is_active: true,
            is_public: false,
            last_used_at: None,
            last_used_flash: None,
            last_used_pro: None,
            last_used_tier3: None,
            total_requests: 0,
            failed_requests: 0,
            last_error: None,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn missing_token_is_expired() {
        assert!(TokenRefresher::is_token_expired(&oauth_cred(None, None)));
        assert!(TokenRefresher::is_token_expired(&oauth_cred(Some(""), None)));
    }

    #[test]
    fn token_without_expiry_is_expired() {
        assert!(TokenRefresher::is_token_expired(&oauth_cred(
            Some("enc:abc"),
            None
        )));
    }

    #[test]
    fn five_minute_skew_applies() {
        let soon = Utc::now() + Duration::minutes(3);
        let later = Utc::now() + Duration::minutes(10);
        assert!(TokenRefresher::is_token_expired(&oauth_cred(
            Some("enc:abc"),
            Some(soon)
        )));
        assert!(!TokenRefresher::is_token_expired(&oauth_cred(
            Some("enc:abc"),
            Some(later)
        )));
    }
}
