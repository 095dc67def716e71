use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One audit record per logical proxied request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    /// 0 when the fallback candidate served (or last tried) the request.
    pub channel_id: i64,
    pub request_id: String,
    /// Display model as declared by the caller.
    pub model_name: String,
    pub upstream_model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub latency_ms: u64,
    pub status: RequestStatus,
    /// `"<upstream status>:<stage>"` or just `"<stage>"`.
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub ip_address: String,
    pub is_streaming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}
