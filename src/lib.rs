//! Claude Gateway: multi-channel LLM proxy.
//!
//! Accepts Anthropic Messages and OpenAI Chat Completions traffic, resolves
//! the requested model to an ordered list of upstream channels, fails over
//! between them and records one usage log per request. The binary in
//! `main.rs` wires this library to a SQLite store.

pub mod cli;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod store;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};

use middleware::metrics::PrometheusRecorder;
use proxy::accounting::UsageAccountant;
use proxy::upstream::UpstreamClient;
use store::{LogSink, MappingStore};

/// Body size ceiling for all routes.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: config::Config,
    pub mappings: Arc<dyn MappingStore>,
    pub upstream_client: UpstreamClient,
    pub accountant: UsageAccountant,
    pub metrics: Arc<PrometheusRecorder>,
}

impl AppState {
    pub fn new(
        config: config::Config,
        mappings: Arc<dyn MappingStore>,
        log_sink: Arc<dyn LogSink>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(PrometheusRecorder::new()?);
        let upstream_client = UpstreamClient::new(config.upstream_timeout())?;
        let accountant = UsageAccountant::new(log_sink, metrics.clone());
        Ok(Self {
            config,
            mappings,
            upstream_client,
            accountant,
            metrics,
        })
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/health", get(health))
        .route("/metrics", get(metrics_handler))
        // Inference
        .route("/v1/models", get(proxy::handler::list_models))
        .route("/v1/messages", post(proxy::handler::messages))
        .route("/v1/chat/completions", post(proxy::handler::chat_completions))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    if state.config.enable_cors {
        router = router.layer(cors_layer(&state.config));
    }

    router
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "claude-gateway" }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

fn cors_layer(config: &config::Config) -> CorsLayer {
    let origins = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("anthropic-version"),
            HeaderName::from_static("x-request-id"),
        ])
}

/// Middleware: gives every response an X-Request-Id. Proxied responses
/// already carry the id of their request log and keep it.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    if !resp.headers().contains_key("x-request-id") {
        if let Ok(val) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            resp.headers_mut().insert("x-request-id", val);
        }
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));

    // SSE responses set their own no-cache
    if !headers.contains_key(CACHE_CONTROL) {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    headers.remove("server");
    resp
}
