//! OpenAI-compatible surface: `/v1/models` and `/v1/chat/completions`.

use crate::db::UsageFinal;
use crate::error::ProxyError;
use crate::rewrite::openai::{chat_to_native, extract_content, native_to_chat};
use crate::rewrite::parse_route;
use crate::server::dispatch::{
    CallFailure, RequestMeta, body_snippet, enforce_quota, execute, latency_ms, open_log,
    surface_failure, surface_rejection,
};
use crate::server::guards::auth::AuthedUser;
use crate::server::respond::{FakeStreamPayload, StreamFinalizer, fake_stream, openai_stream};
use crate::server::router::AppState;
use crate::service::pool::requires_tier3;
use crate::upstream::Variant;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{Json, extract::State};
use castor_schema::gemini::GeminiResponseBody;
use castor_schema::openai::{ChatRequest, OpenaiModelList};
use castor_schema::AssistResponseBody;
use std::time::Instant;

/// Variant-prefixed model catalog. Tier-3 entries are hidden from callers
/// without tier-3 access on that variant.
pub async fn list_models(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
) -> Result<Json<OpenaiModelList>, ProxyError> {
    let mut names: Vec<String> = Vec::new();

    for (variant, list) in [
        (Variant::GeminiCli, &state.upstreams.geminicli_model_list),
        (Variant::Antigravity, &state.upstreams.antigravity_model_list),
    ] {
        let stats = state.db.cred_stats(user.id, variant).await?;
        let tier3_visible = user.is_admin || stats.tier3 > 0 || user.quota_tier3 > 0;
        for model in list {
            if requires_tier3(model) && !tier3_visible {
                continue;
            }
            names.push(format!("{}{model}", variant.model_prefix()));
        }
    }

    Ok(Json(OpenaiModelList::from_model_names(
        names,
        "castor".to_string(),
    )))
}

pub async fn chat_completions(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ProxyError> {
    let started = Instant::now();
    let meta = RequestMeta {
        endpoint: "/v1/chat/completions".to_string(),
        client_ip: super::client_ip(&headers),
        user_agent: super::user_agent(&headers),
    };

    let route = parse_route(&request.model);
    let log_id = open_log(&state, &user, &request.model, &meta).await?;

    if let Err(e) = enforce_quota(&state, &user, &request.model, route.variant).await {
        return Err(surface_rejection(&state, &user, log_id, started, e).await);
    }

    let native = chat_to_native(&request);
    let snippet = body_snippet(&request);

    if request.stream && route.fake_stream {
        let model = request.model.clone();
        let call = {
            let state = state.clone();
            let user = user.clone();
            let route = route.clone();
            async move {
                match execute(&state, &user, &route, native, false).await {
                    Ok(call) => match call.response.json::<AssistResponseBody>().await {
                        Ok(envelope) => {
                            let body: GeminiResponseBody = envelope.into();
                            let extracted = extract_content(&body, Some(&state.images)).await;
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
                            Ok(FakeStreamPayload {
                                content: extracted.content,
                                reasoning: (!extracted.reasoning.is_empty())
                                    .then_some(extracted.reasoning),
                            })
                        }
                        Err(e) => {
                            let failure = CallFailure {
                                error: ProxyError::Reqwest(e),
                                retry_count: call.retry_count,
                                cooldown_seconds: None,
                                credential_id: Some(call.credential_id),
                                credential_email: call.credential_email,
                            };
                            let err =
                                surface_failure(&state, &user, log_id, started, failure, snippet.clone()).await;
                            Err(err.to_string())
                        }
                    },
                    Err(failure) => {
                        let err = surface_failure(&state, &user, log_id, started, failure, snippet.clone()).await;
                        Err(err.to_string())
                    }
                }
            }
        };
        return Ok(fake_stream(model, call));
    }

    if request.stream {
        let call = match execute(&state, &user, &route, native, true).await {
            Ok(call) => call,
            Err(failure) => {
                return Err(surface_failure(&state, &user, log_id, started, failure, snippet.clone()).await);
            }
        };

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
        return Ok(openai_stream(
            call.response,
            request.model.clone(),
            state.images.clone(),
            finalizer,
        ));
    }

    // Plain non-streaming request/response.
    let call = match execute(&state, &user, &route, native, false).await {
        Ok(call) => call,
        Err(failure) => {
            return Err(surface_failure(&state, &user, log_id, started, failure, snippet.clone()).await);
        }
    };

    let body: GeminiResponseBody = match call.response.json::<AssistResponseBody>().await {
        Ok(envelope) => envelope.into(),
        Err(e) => {
            let failure = CallFailure {
                error: ProxyError::Reqwest(e),
                retry_count: call.retry_count,
                cooldown_seconds: None,
                credential_id: Some(call.credential_id),
                credential_email: call.credential_email,
            };
            return Err(surface_failure(&state, &user, log_id, started, failure, snippet.clone()).await);
        }
    };

    let response = native_to_chat(&body, &request.model, Some(&state.images)).await;

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

    Ok(Json(response).into_response())
}
