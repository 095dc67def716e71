use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::models::Protocol;

/// Where a single upstream attempt broke down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Outbound body could not be serialized.
    MarshalRequest,
    /// Dial / connect / send failure.
    HttpRequest,
    Timeout,
    /// Upstream answered with a non-2xx status.
    UpstreamStatus,
    ReadResponse,
    ParseResponse,
    /// Upstream failed after the stream was committed to the caller.
    StreamInterrupted,
    ClientClosed,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::MarshalRequest => "marshal_request",
            FailureStage::HttpRequest => "http_request",
            FailureStage::Timeout => "timeout",
            FailureStage::UpstreamStatus => "api_error",
            FailureStage::ReadResponse => "read_response",
            FailureStage::ParseResponse => "parse_response",
            FailureStage::StreamInterrupted => "stream_interrupted",
            FailureStage::ClientClosed => "client_closed",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure of one candidate attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage}: {message}")]
pub struct AttemptFailure {
    pub stage: FailureStage,
    pub upstream_status: Option<u16>,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(stage: FailureStage, upstream_status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            stage,
            upstream_status,
            message: message.into(),
        }
    }

    /// Classify a transport error. Timeouts win over the supplied stage.
    pub fn transport(stage: FailureStage, upstream_status: Option<u16>, err: &reqwest::Error) -> Self {
        let stage = if err.is_timeout() {
            FailureStage::Timeout
        } else {
            stage
        };
        Self::new(stage, upstream_status, err.to_string())
    }

    /// Wire/log form, e.g. `502:api_error` or `http_request`.
    pub fn code(&self) -> String {
        match self.upstream_status {
            Some(status) => format!("{}:{}", status, self.stage),
            None => self.stage.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid API key")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("all channels failed for model {model}: {last}")]
    AllChannelsExhausted { model: String, last: AttemptFailure },
}

impl AppError {
    fn parts(&self, protocol: Protocol) -> (StatusCode, &'static str, String, String) {
        match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                match protocol {
                    Protocol::Anthropic => "authentication_error",
                    Protocol::OpenAi => "invalid_request_error",
                },
                "invalid_api_key".to_string(),
                "invalid API key".to_string(),
            ),
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request".to_string(),
                msg.clone(),
            ),
            AppError::AllChannelsExhausted { model, last } => (
                StatusCode::BAD_GATEWAY,
                "api_error",
                last.code(),
                format!("all channels failed for model {}: {}", model, last.message),
            ),
        }
    }

    /// Render in the envelope the entrypoint's protocol expects.
    pub fn into_wire_response(self, protocol: Protocol) -> Response {
        let (status, error_type, code, msg) = self.parts(protocol);
        let body = match protocol {
            Protocol::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": error_type,
                    "message": msg,
                }
            }),
            Protocol::OpenAi => json!({
                "error": {
                    "message": msg,
                    "type": error_type,
                    "code": code,
                }
            }),
        };
        (status, Json(body)).into_response()
    }
}
