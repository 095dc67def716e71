use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use super::{failover, resolver};
use crate::errors::AppError;
use crate::middleware::auth;
use crate::models::{InboundRequest, Protocol};
use crate::AppState;

/// Models advertised by `GET /v1/models`.
const STATIC_MODELS: &[&str] = &[
    "claude-sonnet-4-5-thinking",
    "claude-opus-4-5-thinking",
    "claude-haiku-4-5-20251001",
];

/// `POST /v1/messages`: Anthropic Messages entrypoint.
#[tracing::instrument(skip_all, fields(protocol = "anthropic"))]
pub async fn messages(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(&state, Protocol::Anthropic, peer.map(|c| c.0), &headers, &body).await
}

/// `POST /v1/chat/completions`: OpenAI Chat Completions entrypoint.
#[tracing::instrument(skip_all, fields(protocol = "openai"))]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(&state, Protocol::OpenAi, peer.map(|c| c.0), &headers, &body).await
}

/// `GET /v1/models`
pub async fn list_models() -> Json<serde_json::Value> {
    let data: Vec<_> = STATIC_MODELS
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 1234567890,
                "owned_by": "anthropic",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

async fn proxy(
    state: &AppState,
    protocol: Protocol,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    // -- 1. Authenticate --
    let caller_key = match auth::authorize(headers, state.config.api_key()) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!("rejected caller: {}", e);
            return e.into_wire_response(protocol);
        }
    };

    // -- 2. Parse --
    let request = match InboundRequest::parse(protocol, body) {
        Ok(req) => req,
        Err(e) => {
            return AppError::InvalidRequest(format!("invalid request body: {}", e)).into_wire_response(protocol);
        }
    };
    if request.model().trim().is_empty() {
        return AppError::InvalidRequest("model is required".to_string()).into_wire_response(protocol);
    }

    // -- 3. Resolve candidates --
    let request_id = Uuid::new_v4().to_string();
    let audit = state.accountant.begin(
        request_id.clone(),
        request.model(),
        client_ip(headers, peer),
        request.is_stream(),
    );
    let candidates = resolver::resolve(
        state.mappings.as_ref(),
        request.model(),
        caller_key.as_deref(),
        &state.config.fallback_target(),
    )
    .await;

    tracing::info!(
        request_id = %request_id,
        model = %request.model(),
        stream = request.is_stream(),
        candidates = candidates.len(),
        "proxying request"
    );

    // -- 4. Dispatch --
    let mut response = match failover::serve(&state.upstream_client, &request, &candidates, audit).await {
        Ok(resp) => resp,
        Err(e) => e.into_wire_response(protocol),
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }
    if let Some(ip) = header("x-real-ip") {
        return ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}
