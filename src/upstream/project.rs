//! Upstream `project_id` discovery.
//!
//! Two-step probe against the code-assist endpoint: `loadCodeAssist` for
//! already-activated accounts, falling back to the long-running `onboardUser`
//! operation polled at a fixed cadence. The result is persisted on the
//! credential row and reused for its lifetime.

use crate::error::ProxyError;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const ONBOARD_POLL_ATTEMPTS: u32 = 5;
const ONBOARD_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn probe_metadata() -> Value {
    json!({
        "ideType": "ANTIGRAVITY",
        "platform": "PLATFORM_UNSPECIFIED",
        "pluginType": "GEMINI"
    })
}

fn internal_url(api_base: &Url, rpc: &str) -> String {
    format!("{}/v1internal:{rpc}", api_base.as_str().trim_end_matches('/'))
}

/// Discover the tenant project id for an access token. Errors out only when
/// both probes fail; the caller decides whether that disables the credential.
pub async fn resolve_project_id(
    client: &reqwest::Client,
    api_base: &Url,
    access_token: &str,
) -> Result<String, ProxyError> {
    match try_load_code_assist(client, api_base, access_token).await {
        Ok(Some(project_id)) => return Ok(project_id),
        Ok(None) => {
            debug!("loadCodeAssist returned no project id, onboarding");
        }
        Err(e) => {
            warn!("loadCodeAssist probe failed, onboarding: {e}");
        }
    }

    try_onboard_user(client, api_base, access_token).await
}

/// Returns the companion project when the account already has a tier.
async fn try_load_code_assist(
    client: &reqwest::Client,
    api_base: &Url,
    access_token: &str,
) -> Result<Option<String>, ProxyError> {
    let body = load_code_assist(client, api_base, access_token).await?;

    if body.get("currentTier").is_none_or(Value::is_null) {
        return Ok(None);
    }
    Ok(body
        .get("cloudaicompanionProject")
        .and_then(Value::as_str)
        .map(str::to_string))
}

async fn load_code_assist(
    client: &reqwest::Client,
    api_base: &Url,
    access_token: &str,
) -> Result<Value, ProxyError> {
    let resp = client
        .post(internal_url(api_base, "loadCodeAssist"))
        .bearer_auth(access_token)
        .json(&json!({"metadata": probe_metadata()}))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProxyError::Upstream { status, body });
    }
    Ok(resp.json().await?)
}

/// Onboarding tier: the default entry of `allowedTiers`, else `"LEGACY"`.
async fn onboard_tier(
    client: &reqwest::Client,
    api_base: &Url,
    access_token: &str,
) -> Result<String, ProxyError> {
    let body = load_code_assist(client, api_base, access_token).await?;
    let tier = body
        .get("allowedTiers")
        .and_then(Value::as_array)
        .and_then(|tiers| {
            tiers
                .iter()
                .find(|tier| tier.get("isDefault").and_then(Value::as_bool) == Some(true))
        })
        .and_then(|tier| tier.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("LEGACY")
        .to_string();
    Ok(tier)
}

/// `onboardUser` is a long-running operation: poll until `done` or the
/// attempt budget runs out (~10s).
async fn try_onboard_user(
    client: &reqwest::Client,
    api_base: &Url,
    access_token: &str,
) -> Result<String, ProxyError> {
    let tier = onboard_tier(client, api_base, access_token).await?;
    info!(tier = %tier, "onboarding code-assist account");

    let request_body = json!({
        "tierId": tier,
        "metadata": probe_metadata()
    });

    for attempt in 1..=ONBOARD_POLL_ATTEMPTS {
        let resp = client
            .post(internal_url(api_base, "onboardUser"))
            .bearer_auth(access_token)
            .json(&request_body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream { status, body });
        }

        let body: Value = resp.json().await?;
        if body.get("done").and_then(Value::as_bool) == Some(true) {
            return extract_onboarded_project(&body).ok_or_else(|| {
                ProxyError::ProjectDiscovery(
                    "onboarding finished without a project id".to_string(),
                )
            });
        }

        debug!(attempt, "onboarding still running");
        tokio::time::sleep(ONBOARD_POLL_INTERVAL).await;
    }

    Err(ProxyError::ProjectDiscovery(format!(
        "onboarding did not complete within {ONBOARD_POLL_ATTEMPTS} polls"
    )))
}

/// The finished operation nests the project either as an object with an `id`
/// or as a flat string.
fn extract_onboarded_project(operation: &Value) -> Option<String> {
    let project = operation.get("response")?.get("cloudaicompanionProject")?;
    match project {
        Value::String(id) => Some(id.clone()),
        Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarded_project_object_form() {
        let op = json!({
            "done": true,
            "response": {"cloudaicompanionProject": {"id": "proj-123"}}
        });
        assert_eq!(extract_onboarded_project(&op).as_deref(), Some("proj-123"));
    }

    #[test]
    fn onboarded_project_flat_string_form() {
        let op = json!({
            "done": true,
            "response": {"cloudaicompanionProject": "proj-456"}
        });
        assert_eq!(extract_onboarded_project(&op).as_deref(), Some("proj-456"));
    }

    #[test]
    fn missing_project_yields_none() {
        assert!(extract_onboarded_project(&json!({"done": true, "response": {}})).is_none());
        assert!(extract_onboarded_project(&json!({})).is_none());
    }

    #[test]
    fn internal_url_strips_trailing_slash() {
        let base = Url::parse("https://cloudcode-pa.googleapis.com/").unwrap();
        assert_eq!(
            internal_url(&base, "loadCodeAssist"),
            "https://cloudcode-pa.googleapis.com/v1internal:loadCodeAssist"
        );
    }
}
