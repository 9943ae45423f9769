mod classify;

pub use classify::{ErrorKind, classify, extract_status, is_transient_error};

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error as ThisError;

pub trait IsRetryable {
    /// Whether the dispatcher should switch credential and try again.
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, ThisError)]
pub enum ProxyError {
    /// Upstream returned a non-success status; body is the raw error text.
    #[error("API Error {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Actor error: {0}")]
    Ractor(String),

    #[error("No available credential")]
    NoCredential,

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Project discovery failed: {0}")]
    ProjectDiscovery(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    QuotaExhausted(String),

    #[error("{0}")]
    RateLimited(String),

    /// Terminal dispatcher error carrying the user-visible message after all
    /// retries were spent.
    #[error("{message}")]
    Api {
        status: StatusCode,
        kind: ErrorKind,
        message: String,
    },

}

impl ProxyError {
    /// The classification recorded on usage-log rows for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Upstream { status, body } => classify(status.as_u16(), body).0,
            ProxyError::Reqwest(e) if e.is_timeout() => ErrorKind::Timeout,
            ProxyError::Reqwest(_) => ErrorKind::NetworkError,
            ProxyError::NoCredential => ErrorKind::NoCredential,
            ProxyError::TokenRefresh(_) => ErrorKind::TokenError,
            ProxyError::ProjectDiscovery(_) => ErrorKind::ConfigError,
            ProxyError::Forbidden(_) => ErrorKind::AuthError,
            ProxyError::QuotaExhausted(_) => ErrorKind::QuotaExhausted,
            ProxyError::RateLimited(_) => ErrorKind::RateLimit,
            ProxyError::Api { kind, .. } => *kind,
            _ => ErrorKind::Unknown,
        }
    }

    /// HTTP status surfaced to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::Api { status, .. } => *status,
            ProxyError::NoCredential => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Forbidden(_) => StatusCode::FORBIDDEN,
            ProxyError::QuotaExhausted(_) | ProxyError::RateLimited(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ProxyError::Reqwest(_) => StatusCode::BAD_GATEWAY,
            ProxyError::TokenRefresh(_) | ProxyError::ProjectDiscovery(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IsRetryable for ProxyError {
    fn is_retryable(&self) -> bool {
        match self {
            // Credential-switch set: rate limits, server-side failures and
            // model-not-found responses move on to the next credential.
            ProxyError::Upstream { status, body } => {
                matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504 | 404)
                    || is_transient_error(body)
            }
            ProxyError::Reqwest(_) => true,
            ProxyError::TokenRefresh(_) | ProxyError::ProjectDiscovery(_) => true,
            _ => false,
        }
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self {
            // Internal failure details stay out of client responses.
            ProxyError::Database(_) | ProxyError::Ractor(_) => {
                "An internal server error occurred.".to_string()
            }
            other => other.to_string(),
        };
        let body = ApiErrorBody {
            inner: ApiErrorObject {
                kind: self.kind().as_str().to_string(),
                code: status.as_u16(),
                message,
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
