//! Shared HTTP client for dispatching to upstream channels.
//!
//! One instance lives in `AppState`; reqwest pools keep-alive connections
//! per host underneath. No retry middleware: failover across candidates is
//! the only retry the gateway performs.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;

use crate::errors::{AttemptFailure, FailureStage};
use crate::models::anthropic::ANTHROPIC_VERSION;
use crate::models::Protocol;

/// Longest upstream error body kept for the log record.
const MAX_ERROR_BODY: usize = 2048;

/// Where and how one candidate is reached.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub base_url: String,
    pub api_key: String,
    pub protocol: Protocol,
    pub timeout: Duration,
}

impl UpstreamTarget {
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.protocol {
            Protocol::Anthropic => format!("{}/v1/messages", base),
            Protocol::OpenAi => format!("{}/v1/chat/completions", base),
        }
    }

    fn headers(&self, streaming: bool) -> Result<HeaderMap, AttemptFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if streaming {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        let credential = |value: String| {
            HeaderValue::from_str(&value).map_err(|_| {
                AttemptFailure::new(FailureStage::MarshalRequest, None, "credential is not a valid header value")
            })
        };
        match self.protocol {
            Protocol::Anthropic => {
                headers.insert("x-api-key", credential(self.api_key.clone())?);
                headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
            }
            Protocol::OpenAi => {
                headers.insert(AUTHORIZATION, credential(format!("Bearer {}", self.api_key))?);
            }
        }
        Ok(headers)
    }
}

pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(default_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(default_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    /// POST `body` to the target and validate the status line.
    ///
    /// Returns only 2xx responses; anything else is an `AttemptFailure`
    /// carrying the upstream status and error message. The target timeout
    /// bounds the whole exchange, body included.
    pub async fn send(
        &self,
        target: &UpstreamTarget,
        body: Vec<u8>,
        streaming: bool,
    ) -> Result<reqwest::Response, AttemptFailure> {
        let resp = self
            .client
            .post(target.endpoint())
            .headers(target.headers(streaming)?)
            .timeout(target.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %target.endpoint(), "upstream request failed: {}", e);
                AttemptFailure::transport(FailureStage::HttpRequest, None, &e)
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        Err(AttemptFailure::new(
            FailureStage::UpstreamStatus,
            Some(status.as_u16()),
            upstream_error_message(&text),
        ))
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Both protocols nest `{type, message}` under `error`; fall back to the
/// raw (truncated) body otherwise.
fn upstream_error_message(body: &str) -> String {
    if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(body) {
        match (env.error.kind, env.error.message) {
            (Some(kind), Some(message)) => return format!("{}: {}", kind, message),
            (None, Some(message)) => return message,
            (Some(kind), None) => return kind,
            (None, None) => {}
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    let mut end = trimmed.len().min(MAX_ERROR_BODY);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(base_url: &str, protocol: Protocol) -> UpstreamTarget {
        UpstreamTarget {
            base_url: base_url.to_string(),
            api_key: "sk-channel".to_string(),
            protocol,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_endpoint_per_flavor() {
        assert_eq!(
            target("https://api.anthropic.com/", Protocol::Anthropic).endpoint(),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            target("https://api.openai.com", Protocol::OpenAi).endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            upstream_error_message(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            "overloaded_error: Overloaded"
        );
        assert_eq!(
            upstream_error_message(r#"{"error":{"message":"bad key","type":null}}"#),
            "bad key"
        );
        assert_eq!(upstream_error_message("  upstream timeout  "), "upstream timeout");
        assert_eq!(upstream_error_message(""), "empty response body");
        assert_eq!(upstream_error_message(&"é".repeat(2000)).len(), 2048);
    }

    #[tokio::test]
    async fn test_anthropic_headers_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-channel"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(header("accept", "text/event-stream"))
            .and(body_json(serde_json::json!({"model": "m"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(Duration::from_secs(5)).unwrap();
        let resp = client
            .send(&target(&server.uri(), Protocol::Anthropic), br#"{"model":"m"}"#.to_vec(), true)
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_openai_bearer_and_status_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-channel"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({"error": {"message": "slow down", "type": "rate_limit"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .send(&target(&server.uri(), Protocol::OpenAi), b"{}".to_vec(), false)
            .await
            .unwrap_err();
        assert_eq!(err.stage, FailureStage::UpstreamStatus);
        assert_eq!(err.upstream_status, Some(429));
        assert_eq!(err.code(), "429:api_error");
        assert_eq!(err.message, "rate_limit: slow down");
    }

    #[tokio::test]
    async fn test_timeout_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(Duration::from_secs(5)).unwrap();
        let mut t = target(&server.uri(), Protocol::Anthropic);
        t.timeout = Duration::from_millis(50);
        let err = client.send(&t, b"{}".to_vec(), false).await.unwrap_err();
        assert_eq!(err.stage, FailureStage::Timeout);
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_request() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UpstreamClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .send(&target(&format!("http://{}", addr), Protocol::OpenAi), b"{}".to_vec(), false)
            .await
            .unwrap_err();
        assert_eq!(err.stage, FailureStage::HttpRequest);
        assert!(err.upstream_status.is_none());
    }
}
