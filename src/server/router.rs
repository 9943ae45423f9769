use crate::config::{Config, ResolvedUpstreams};
use crate::db::DbActorHandle;
use crate::server::routes::{native, openai};
use crate::service::{
    CredentialPool, ErrorMessageService, ImageStorage, QuotaGuard, RuntimeSettings, UsageLogger,
};
use crate::upstream::{TokenRefresher, UpstreamClient, Variant};
use crate::vault::CryptoVault;

use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use base64::Engine as _;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};
use url::Url;

/// Upstream-facing HTTP timeouts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct AppState {
    pub db: DbActorHandle,
    pub pool: CredentialPool,
    pub quota: QuotaGuard,
    pub usage: UsageLogger,
    pub error_messages: ErrorMessageService,
    pub images: ImageStorage,
    pub refresher: TokenRefresher,
    pub upstreams: Arc<ResolvedUpstreams>,
    geminicli: UpstreamClient,
    antigravity: UpstreamClient,
    geminicli_http: reqwest::Client,
    antigravity_http: reqwest::Client,
}

fn build_client(user_agent: &str, proxy: Option<&Url>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT);

    if let Some(proxy_url) = proxy {
        let proxy =
            reqwest::Proxy::all(proxy_url.as_str()).expect("invalid proxy url for reqwest client");
        builder = builder.proxy(proxy);
    }

    builder.build().expect("failed to build reqwest client")
}

impl AppState {
    pub fn new(cfg: &Config, db: DbActorHandle) -> Self {
        let upstreams = Arc::new(cfg.upstreams());
        let vault = CryptoVault::new(&cfg.basic.vault_key);
        let settings = RuntimeSettings::new(db.clone());
        let pool = CredentialPool::new(db.clone(), settings.clone(), cfg.policy.clone());
        let quota = QuotaGuard::new(db.clone(), cfg.policy.clone());
        let usage = UsageLogger::new(db.clone());
        let error_messages = ErrorMessageService::new(db.clone(), settings.clone());
        let images = ImageStorage::new(cfg.basic.image_dir.clone());

        let geminicli_http = build_client(
            Variant::GeminiCli.user_agent(),
            upstreams.geminicli_proxy.as_ref(),
        );
        let antigravity_http = build_client(
            Variant::Antigravity.user_agent(),
            upstreams.antigravity_proxy.as_ref(),
        );

        let geminicli = UpstreamClient::new(
            Variant::GeminiCli,
            geminicli_http.clone(),
            upstreams.geminicli_api_url.clone(),
        );
        let antigravity = UpstreamClient::new(
            Variant::Antigravity,
            antigravity_http.clone(),
            upstreams.antigravity_api_url.clone(),
        );

        // Token refreshes ride the gcli client; only the token URI differs.
        let refresher = TokenRefresher::new(
            geminicli_http.clone(),
            db.clone(),
            vault.clone(),
            upstreams.clone(),
        );

        Self {
            db,
            pool,
            quota,
            usage,
            error_messages,
            images,
            refresher,
            upstreams,
            geminicli,
            antigravity,
            geminicli_http,
            antigravity_http,
        }
    }

    pub fn upstream_client(&self, variant: Variant) -> &UpstreamClient {
        match variant {
            Variant::GeminiCli => &self.geminicli,
            Variant::Antigravity => &self.antigravity,
        }
    }

    pub fn http_client(&self, variant: Variant) -> &reqwest::Client {
        match variant {
            Variant::GeminiCli => &self.geminicli_http,
            Variant::Antigravity => &self.antigravity_http,
        }
    }

    pub fn api_base(&self, variant: Variant) -> &Url {
        match variant {
            Variant::GeminiCli => &self.upstreams.geminicli_api_url,
            Variant::Antigravity => &self.upstreams.antigravity_api_url,
        }
    }

    pub fn retry_max_times(&self, variant: Variant) -> usize {
        match variant {
            Variant::GeminiCli => self.upstreams.geminicli_retry_max_times,
            Variant::Antigravity => self.upstreams.antigravity_retry_max_times,
        }
    }

    pub async fn store_project(&self, cred_id: i64, project_id: &str) -> Result<(), crate::error::ProxyError> {
        self.db
            .mutate_credential(crate::db::CredentialMutation::StoreProject {
                id: cred_id,
                project_id: project_id.to_string(),
            })
            .await
    }
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    // 96 bits => 16 chars base64url (no padding).
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Always reflect `x-request-id` for correlation, even if the client
    // didn't send one.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    // For SSE responses latency_ms is time-to-first-byte, not stream length.
    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    }

    resp
}

pub fn app_router(state: AppState) -> Router {
    let images_dir = state.images.dir().clone();

    Router::new()
        .route("/v1/models", get(openai::list_models))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1beta/models", get(native::list_models))
        .route("/v1beta/models/{*path}", post(native::generate))
        .nest_service("/images", ServeDir::new(images_dir))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(access_log))
}
