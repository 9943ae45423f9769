//! Per-request state machine: quota, routing, credential acquisition with
//! switching retries, request rewriting, upstream call, usage logging.

use crate::db::models::{DbCredential, DbUser};
use crate::db::{UsageDraft, UsageFinal};
use crate::error::{IsRetryable, ProxyError, classify, extract_status};
use crate::rewrite::model_name::ModelRoute;
use crate::rewrite::normalize_request;
use crate::server::router::AppState;
use crate::upstream::{Variant, resolve_project_id};
use axum::http::StatusCode;
use castor_schema::{AssistEnvelopeMeta, GenerateContentRequest};
use std::time::Instant;
use tracing::{info, warn};

/// Request-scoped metadata captured at the HTTP edge.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub endpoint: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A successful upstream call plus the bookkeeping the logger needs.
pub struct UpstreamCall {
    pub response: reqwest::Response,
    pub credential_id: i64,
    pub credential_email: Option<String>,
    pub retry_count: i64,
}

/// Everything known about a failed dispatch, for log finalisation.
pub struct CallFailure {
    pub error: ProxyError,
    pub retry_count: i64,
    pub cooldown_seconds: Option<i64>,
    pub credential_id: Option<i64>,
    pub credential_email: Option<String>,
}

impl CallFailure {
    fn without_credential(error: ProxyError) -> Self {
        Self {
            error,
            retry_count: 0,
            cooldown_seconds: None,
            credential_id: None,
            credential_email: None,
        }
    }
}

/// Insert the in-flight usage-log row. Runs before the quota guard so the
/// minute-window counter includes the current request.
pub async fn open_log(
    state: &AppState,
    user: &DbUser,
    model: &str,
    meta: &RequestMeta,
) -> Result<i64, ProxyError> {
    state
        .usage
        .record_placeholder(UsageDraft {
            user_id: user.id,
            model: model.to_string(),
            endpoint: meta.endpoint.clone(),
            client_ip: meta.client_ip.clone(),
            user_agent: meta.user_agent.clone(),
        })
        .await
}

/// Run the quota guard for non-admin callers.
pub async fn enforce_quota(
    state: &AppState,
    user: &DbUser,
    model: &str,
    variant: Variant,
) -> Result<(), ProxyError> {
    if user.is_admin {
        return Ok(());
    }
    state.quota.check(user, model, variant).await
}

/// The credential-switching loop. Rewrites once, then walks the pool until a
/// call sticks or the retry budget is spent; each failed credential is
/// excluded from the next acquisition.
pub async fn execute(
    state: &AppState,
    user: &DbUser,
    route: &ModelRoute,
    mut request: GenerateContentRequest,
    stream: bool,
) -> Result<UpstreamCall, CallFailure> {
    let variant = route.variant;
    let client = state.upstream_client(variant);
    let max_retries = state.retry_max_times(variant);

    let upstream_model = normalize_request(
        variant,
        &route.model,
        &mut request,
        &state.upstreams.antigravity_system_preamble,
    );

    let mut exclude_ids: Vec<i64> = Vec::new();
    let mut cooldown_seconds: Option<i64> = None;
    let mut last_failure: Option<CallFailure> = None;

    for attempt in 0..=max_retries {
        let acquired = state
            .pool
            .acquire(user.id, &route.model, &exclude_ids, variant)
            .await
            .map_err(CallFailure::without_credential)?;

        let Some(cred) = acquired else {
            // Pool exhausted: surface the last upstream error if any attempt
            // was made, else there was never a credential to try.
            return Err(last_failure
                .unwrap_or_else(|| CallFailure::without_credential(ProxyError::NoCredential)));
        };

        let retry_count = i64::try_from(attempt).unwrap_or(i64::MAX);
        match attempt_call(
            state,
            &cred,
            variant,
            client,
            &upstream_model,
            &route.model,
            &request,
            stream,
        )
        .await
        {
            Ok(response) => {
                if attempt > 0 {
                    info!(
                        cred.id = cred.id,
                        retries = attempt,
                        "request served after credential switch"
                    );
                }
                return Ok(UpstreamCall {
                    response,
                    credential_id: cred.id,
                    credential_email: cred.email.clone(),
                    retry_count,
                });
            }
            Err(AttemptError {
                error,
                rate_limit_cooldown,
            }) => {
                if let Some(cd) = rate_limit_cooldown {
                    cooldown_seconds = Some(cd);
                }
                let retryable = error.is_retryable();
                warn!(
                    cred.id = cred.id,
                    attempt,
                    retryable,
                    "upstream attempt failed: {error}"
                );
                last_failure = Some(CallFailure {
                    error,
                    retry_count,
                    cooldown_seconds,
                    credential_id: Some(cred.id),
                    credential_email: cred.email.clone(),
                });
                if !retryable {
                    break;
                }
                exclude_ids.push(cred.id);
            }
        }
    }

    Err(last_failure
        .unwrap_or_else(|| CallFailure::without_credential(ProxyError::NoCredential)))
}

struct AttemptError {
    error: ProxyError,
    rate_limit_cooldown: Option<i64>,
}

impl AttemptError {
    fn plain(error: ProxyError) -> Self {
        Self {
            error,
            rate_limit_cooldown: None,
        }
    }
}

/// One credential's attempt: token, project, envelope, POST. Cooldown
/// bookkeeping runs on the client-facing model so the group matches the one
/// stamped at acquisition.
#[allow(clippy::too_many_arguments)]
async fn attempt_call(
    state: &AppState,
    cred: &DbCredential,
    variant: Variant,
    client: &crate::upstream::UpstreamClient,
    upstream_model: &str,
    client_model: &str,
    request: &GenerateContentRequest,
    stream: bool,
) -> Result<reqwest::Response, AttemptError> {
    let token = match state.refresher.access_token(cred, variant).await {
        Ok(token) => token,
        Err(e) => {
            let text = e.to_string();
            let _ = state.pool.handle_failure(cred, &text).await;
            return Err(AttemptError::plain(e));
        }
    };

    // Selection excludes project-less rows, but OAuth imports may land here
    // before their first discovery; resolve and persist once.
    let project = match cred.project_id.clone().filter(|p| !p.is_empty()) {
        Some(project) => project,
        None => match resolve_project_id(state.http_client(variant), state.api_base(variant), &token)
            .await
        {
            Ok(project) => {
                if let Err(e) = state.store_project(cred.id, &project).await {
                    warn!(cred.id = cred.id, "project id persist failed: {e}");
                }
                project
            }
            Err(e) => {
                let text = e.to_string();
                let _ = state.pool.handle_failure(cred, &text).await;
                return Err(AttemptError::plain(ProxyError::ProjectDiscovery(text)));
            }
        },
    };

    let envelope = AssistEnvelopeMeta {
        model: upstream_model.to_string(),
        project,
    }
    .into_envelope(request.clone());

    let response = match client.post(&token, &envelope, stream).await {
        Ok(response) => response,
        Err(e) => {
            let text = e.to_string();
            let _ = state.pool.handle_failure(cred, &text).await;
            return Err(AttemptError::plain(e));
        }
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    let mut rate_limit_cooldown = None;
    if status == StatusCode::TOO_MANY_REQUESTS {
        match state
            .pool
            .handle_rate_limit(cred, client_model, &body, retry_after.as_deref())
            .await
        {
            Ok(cd) => rate_limit_cooldown = Some(cd),
            Err(e) => warn!(cred.id = cred.id, "rate-limit bookkeeping failed: {e}"),
        }
    } else {
        let _ = state
            .pool
            .handle_failure(cred, &format!("API Error {}: {body}", status.as_u16()))
            .await;
    }

    Err(AttemptError {
        error: ProxyError::Upstream { status, body },
        rate_limit_cooldown,
    })
}

/// Clipped request-body snippet stored on failed log rows.
pub fn body_snippet<T: serde::Serialize>(body: &T) -> Option<String> {
    serde_json::to_string(body)
        .ok()
        .map(|s| s.chars().take(500).collect())
}

/// Finalise the log row for a failed dispatch and build the client-facing
/// error, applying admin-configured message rules.
pub async fn surface_failure(
    state: &AppState,
    user: &DbUser,
    log_id: i64,
    started: Instant,
    failure: CallFailure,
    request_body: Option<String>,
) -> ProxyError {
    let raw_text = failure.error.to_string();
    let status = match &failure.error {
        ProxyError::Upstream { status, .. } => status.as_u16(),
        other => {
            let fallback = other.status().as_u16();
            extract_status(&raw_text, fallback)
        }
    };
    let (kind, code) = match &failure.error {
        // Guard/pool errors carry their own kind; upstream text is classified.
        ProxyError::Upstream { .. } => classify(status, &raw_text),
        other => (other.kind(), format!("HTTP_{status}")),
    };

    let message = format!(
        "API call failed (retried {} times): {raw_text}",
        failure.retry_count
    );
    let message = state
        .error_messages
        .resolve(kind, &raw_text)
        .await
        .unwrap_or(message);

    state
        .usage
        .finalize_best_effort(
            user.id,
            UsageFinal {
                id: log_id,
                status_code: i64::from(status),
                latency_ms: latency_ms(started),
                credential_id: failure.credential_id,
                credential_email: failure.credential_email,
                error_type: Some(kind.as_str().to_string()),
                error_code: Some(code),
                error_message: Some(raw_text.chars().take(1000).collect()),
                cd_seconds: failure.cooldown_seconds,
                request_body,
                retry_count: failure.retry_count,
            },
        )
        .await;

    ProxyError::Api {
        status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        kind,
        message,
    }
}

/// Finalise the log row for a guard rejection (quota, tier gating) before
/// any upstream work happened.
pub async fn surface_rejection(
    state: &AppState,
    user: &DbUser,
    log_id: i64,
    started: Instant,
    error: ProxyError,
) -> ProxyError {
    let kind = error.kind();
    let status = error.status();
    let raw_text = error.to_string();

    let message = state
        .error_messages
        .resolve(kind, &raw_text)
        .await
        .unwrap_or_else(|| raw_text.clone());

    state
        .usage
        .finalize_best_effort(
            user.id,
            UsageFinal {
                id: log_id,
                status_code: i64::from(status.as_u16()),
                latency_ms: latency_ms(started),
                error_type: Some(kind.as_str().to_string()),
                error_code: Some(format!("HTTP_{}", status.as_u16())),
                error_message: Some(raw_text),
                ..Default::default()
            },
        )
        .await;

    ProxyError::Api {
        status,
        kind,
        message,
    }
}

pub fn latency_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
