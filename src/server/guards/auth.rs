//! API-key authentication.
//!
//! Keys are accepted from `Authorization: Bearer`, `x-api-key`,
//! `x-goog-api-key` (native Gemini clients) or the `?key=` query parameter,
//! in that order. A hit refreshes the key's last-used stamp.

use crate::db::models::DbUser;
use crate::server::router::AppState;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;

fn extract_header_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(auth) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(auth.token().to_string());
    }
    for header in ["x-api-key", "x-goog-api-key"] {
        if let Some(key) = headers.get(header).and_then(|v| v.to_str().ok()) {
            return Some(key.to_string());
        }
    }
    None
}

fn extract_query_token(query: Option<&str>) -> Option<String> {
    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
    })
}

/// Authenticated caller, resolved against the `api_keys`/`users` tables.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub DbUser);

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            extract_header_token(&parts.headers).or_else(|| extract_query_token(parts.uri.query()));

        let Some(key) = token else {
            return Err(AuthError::MissingKey);
        };

        let user = state
            .db
            .user_by_api_key(&key)
            .await
            .map_err(|_| AuthError::Internal)?
            .ok_or(AuthError::InvalidKey)?;

        if !user.is_active {
            return Err(AuthError::Disabled);
        }

        Ok(AuthedUser(user))
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
    Disabled,
    Internal,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, "Missing API key"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AuthError::Disabled => (StatusCode::FORBIDDEN, "Account is disabled"),
            AuthError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Lookup failed"),
        };
        (
            status,
            Json(json!({ "error": "unauthorized", "reason": reason })),
        )
            .into_response()
    }
}
