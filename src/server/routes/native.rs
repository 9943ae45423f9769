//! Native v1beta surface: model list, `:generateContent` and
//! `:streamGenerateContent`.

use crate::db::{CandidateQuery, PoolScope, UsageFinal};
use crate::error::ProxyError;
use crate::server::dispatch::{
    RequestMeta, body_snippet, enforce_quota, execute, latency_ms, open_log, surface_failure,
    surface_rejection,
};
use crate::server::guards::auth::AuthedUser;
use crate::server::respond::{StreamFinalizer, native_stream};
use crate::server::router::AppState;
use crate::service::pool::requires_tier3;
use crate::upstream::Variant;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{
    Json, RequestExt,
    extract::{FromRequest, Path, Request, State},
};
use castor_schema::gemini::{GeminiModelList, GeminiResponseBody, GenerateContentRequest};
use castor_schema::AssistResponseBody;
use serde_json::json;
use std::time::Instant;
use tracing::debug;

/// Request context carved out of the `models/{model}:{rpc}` path.
#[derive(Debug, Clone)]
pub struct NativeContext {
    pub model: String,
    pub stream: bool,
}

pub struct NativePreprocess(pub GenerateContentRequest, pub NativeContext);

impl<S> FromRequest<S> for NativePreprocess
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(mut req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let Path(path) = match req.extract_parts::<Path<String>>().await {
            Ok(p) => p,
            Err(rejection) => return Err(rejection.into_response()),
        };

        let Some(last_seg) = path.split('/').next_back() else {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "model not found in path" })),
            )
                .into_response());
        };
        let (model, rpc) = match last_seg.split_once(':') {
            Some((m, r)) => (m.to_string(), r),
            None => (last_seg.to_string(), "generateContent"),
        };

        let stream = match rpc {
            "generateContent" => false,
            "streamGenerateContent" => true,
            other => {
                return Err((
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "unsupported method", "method": other })),
                )
                    .into_response());
            }
        };

        let Json(body) = match Json::<GenerateContentRequest>::from_request(req, &()).await {
            Ok(v) => v,
            Err(rejection) => return Err(rejection.into_response()),
        };

        Ok(NativePreprocess(body, NativeContext { model, stream }))
    }
}

/// Native-format model list across both variants. When the caller has an
/// Antigravity credential, the upstream's advertised models are merged in.
pub async fn list_models(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
) -> Result<Json<GeminiModelList>, ProxyError> {
    let mut names: Vec<String> = state
        .upstreams
        .geminicli_model_list
        .iter()
        .map(|m| format!("{}{m}", Variant::GeminiCli.model_prefix()))
        .chain(
            state
                .upstreams
                .antigravity_model_list
                .iter()
                .map(|m| format!("{}{m}", Variant::Antigravity.model_prefix())),
        )
        .collect();

    for advertised in advertised_antigravity_models(&state, user.id).await {
        let prefixed = format!("{}{advertised}", Variant::Antigravity.model_prefix());
        if !names.contains(&prefixed) {
            names.push(prefixed);
        }
    }

    if !user.is_admin && user.quota_tier3 == 0 {
        let gcli = state.db.cred_stats(user.id, Variant::GeminiCli).await?;
        let agy = state.db.cred_stats(user.id, Variant::Antigravity).await?;
        if gcli.tier3 == 0 && agy.tier3 == 0 {
            names.retain(|name| !requires_tier3(name));
        }
    }

    Ok(Json(GeminiModelList::from_model_names(names)))
}

/// Best-effort probe of upstream-advertised Antigravity models using one of
/// the caller's own credentials. Failures degrade to an empty list.
async fn advertised_antigravity_models(state: &AppState, user_id: i64) -> Vec<String> {
    let candidates = match state
        .db
        .candidates(CandidateQuery {
            variant: Variant::Antigravity,
            require_tier3: false,
            scope: PoolScope::OwnOnly(user_id),
            exclude_ids: Vec::new(),
        })
        .await
    {
        Ok(candidates) => candidates,
        Err(_) => return Vec::new(),
    };
    let Some(cred) = candidates.first() else {
        return Vec::new();
    };
    let Ok(token) = state.refresher.access_token(cred, Variant::Antigravity).await else {
        debug!(cred.id = cred.id, "model probe skipped, no usable token");
        return Vec::new();
    };
    state
        .upstream_client(Variant::Antigravity)
        .fetch_models(&token)
        .await
}

pub async fn generate(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    headers: HeaderMap,
    NativePreprocess(body, ctx): NativePreprocess,
) -> Result<Response, ProxyError> {
    let started = Instant::now();
    let rpc = if ctx.stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let meta = RequestMeta {
        endpoint: format!("/v1beta/models/{}:{rpc}", ctx.model),
        client_ip: super::client_ip(&headers),
        user_agent: super::user_agent(&headers),
    };

    let route = crate::rewrite::parse_route(&ctx.model);
    let log_id = open_log(&state, &user, &ctx.model, &meta).await?;

    if let Err(e) = enforce_quota(&state, &user, &ctx.model, route.variant).await {
        return Err(surface_rejection(&state, &user, log_id, started, e).await);
    }

    let snippet = body_snippet(&body);
    let call = match execute(&state, &user, &route, body, ctx.stream).await {
        Ok(call) => call,
        Err(failure) => {
            return Err(surface_failure(&state, &user, log_id, started, failure, snippet.clone()).await);
        }
    };

    if ctx.stream {
        let finalizer = StreamFinalizer::new(
            state.usage.clone(),
            user.id,
            UsageFinal {
                id: log_id,
                credential_id: Some(call.credential_id),
                credential_email: call.credential_email.clone(),
                retry_count: call.retry_count,
                ..Default::default()
            },
            started,
        );
        return Ok(native_stream(call.response, finalizer));
    }

    let body: GeminiResponseBody = match call.response.json::<AssistResponseBody>().await {
        Ok(envelope) => envelope.into(),
        Err(e) => {
            let failure = crate::server::dispatch::CallFailure {
                error: ProxyError::Reqwest(e),
                retry_count: call.retry_count,
                cooldown_seconds: None,
                credential_id: Some(call.credential_id),
                credential_email: call.credential_email,
            };
            return Err(surface_failure(&state, &user, log_id, started, failure, snippet.clone()).await);
        }
    };

    state
        .usage
        .finalize_best_effort(
            user.id,
            UsageFinal {
                id: log_id,
                status_code: 200,
                latency_ms: latency_ms(started),
                credential_id: Some(call.credential_id),
                credential_email: call.credential_email,
                retry_count: call.retry_count,
                ..Default::default()
            },
        )
        .await;

    Ok(Json(body).into_response())
}
