//! Native HTTP/SSE calls to the two upstream variants.
//!
//! Both speak `{model, project, request}` to the same `v1internal` RPC names;
//! Antigravity additionally wants a per-request id header and a request-type
//! marker, and rides its own User-Agent (set on the per-variant reqwest
//! client at construction).

use crate::error::ProxyError;
use crate::upstream::Variant;
use backon::{ExponentialBuilder, Retryable};
use castor_schema::AssistEnvelope;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};
use url::Url;
use uuid::Uuid;

#[derive(Clone)]
pub struct UpstreamClient {
    variant: Variant,
    client: reqwest::Client,
    api_base: Url,
    retry_policy: ExponentialBuilder,
}

impl UpstreamClient {
    pub fn new(variant: Variant, client: reqwest::Client, api_base: Url) -> Self {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_max_times(2)
            .with_jitter();
        Self {
            variant,
            client,
            api_base,
            retry_policy,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    fn rpc_url(&self, rpc: &str) -> String {
        format!(
            "{}/v1internal:{rpc}",
            self.api_base.as_str().trim_end_matches('/')
        )
    }

    fn apply_variant_headers(
        &self,
        mut request: reqwest::RequestBuilder,
        model: &str,
    ) -> reqwest::RequestBuilder {
        if self.variant == Variant::Antigravity {
            request = request.header("requestId", format!("req-{}", Uuid::new_v4()));
            let request_type = if model.to_lowercase().contains("image") {
                "image_gen"
            } else {
                "agent"
            };
            request = request.header("requestType", request_type);
        }
        request
    }

    /// POST the envelope to `generateContent` / `streamGenerateContent`.
    /// Transient transport errors and 5xx responses retry in place with
    /// backoff; the response is returned as-is so the dispatcher can apply
    /// credential policy to non-success statuses.
    pub async fn post(
        &self,
        access_token: &str,
        envelope: &AssistEnvelope,
        stream: bool,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = if stream {
            format!("{}?alt=sse", self.rpc_url("streamGenerateContent"))
        } else {
            self.rpc_url("generateContent")
        };

        let resp = (|| async {
            let request = self
                .client
                .post(&url)
                .bearer_auth(access_token)
                .json(envelope);
            let resp = self
                .apply_variant_headers(request, &envelope.model)
                .send()
                .await?;
            if resp.status().is_server_error() {
                let status = resp.status();
                let err = resp.error_for_status().unwrap_err();
                error!(variant = %self.variant, "upstream server error (will retry): {status}");
                return Err(err);
            }
            Ok(resp)
        })
        .retry(self.retry_policy)
        .await?;

        Ok(resp)
    }

    /// Model ids advertised by the upstream. Only Antigravity exposes the
    /// probe; failures degrade to an empty list so callers can fall back to
    /// the configured allowlist.
    pub async fn fetch_models(&self, access_token: &str) -> Vec<String> {
        if self.variant != Variant::Antigravity {
            return Vec::new();
        }

        let request = self
            .client
            .post(self.rpc_url("fetchAvailableModels"))
            .bearer_auth(access_token)
            .json(&serde_json::json!({}));

        let resp = match self.apply_variant_headers(request, "").send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = %resp.status(), "fetchAvailableModels failed");
                return Vec::new();
            }
            Err(e) => {
                warn!("fetchAvailableModels request error: {e}");
                return Vec::new();
            }
        };

        match resp.json::<Value>().await {
            Ok(body) => body
                .get("models")
                .and_then(Value::as_object)
                .map(|models| models.keys().cloned().collect())
                .unwrap_or_default(),
            Err(e) => {
                warn!("fetchAvailableModels parse error: {e}");
                Vec::new()
            }
        }
    }
}
