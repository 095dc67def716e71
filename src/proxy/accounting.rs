//! Per-request usage accounting.
//!
//! `UsageAccountant::begin` hands out a `RequestAudit` that travels with the
//! request (and into the stream pump once committed). Consuming it through
//! `succeed` or `fail` emits the single RequestLog for the request; dropping
//! it unconsumed emits a `client_closed` error instead.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use super::resolver::Candidate;
use crate::errors::{AttemptFailure, FailureStage};
use crate::middleware;
use crate::middleware::metrics::PrometheusRecorder;
use crate::models::audit::{RequestLog, RequestStatus};
use crate::models::TokenUsage;
use crate::store::LogSink;

#[derive(Clone)]
pub struct UsageAccountant {
    sink: Arc<dyn LogSink>,
    metrics: Arc<PrometheusRecorder>,
}

impl UsageAccountant {
    pub fn new(sink: Arc<dyn LogSink>, metrics: Arc<PrometheusRecorder>) -> Self {
        Self { sink, metrics }
    }

    /// Start accounting for one logical request.
    pub fn begin(&self, request_id: String, display_model: &str, client_ip: String, streaming: bool) -> RequestAudit {
        RequestAudit {
            sink: self.sink.clone(),
            metrics: self.metrics.clone(),
            request_id,
            display_model: display_model.to_string(),
            upstream_model: display_model.to_string(),
            channel_id: 0,
            client_ip,
            streaming,
            request_time: Utc::now(),
            started: Instant::now(),
            emitted: false,
        }
    }
}

/// Exactly-once guard for a request's RequestLog.
pub struct RequestAudit {
    sink: Arc<dyn LogSink>,
    metrics: Arc<PrometheusRecorder>,
    request_id: String,
    display_model: String,
    upstream_model: String,
    channel_id: i64,
    client_ip: String,
    streaming: bool,
    request_time: DateTime<Utc>,
    started: Instant,
    emitted: bool,
}

impl RequestAudit {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn display_model(&self) -> &str {
        &self.display_model
    }

    /// The record names the candidate tried last.
    pub fn attempting(&mut self, candidate: &Candidate) {
        self.channel_id = candidate.channel_id();
        self.upstream_model = candidate.upstream_model.clone();
    }

    /// Count the outcome of the current attempt.
    pub fn attempt_finished(&self, failure: Option<&AttemptFailure>) {
        let outcome = failure.map_or("success", |f| f.stage.as_str());
        self.metrics.record_attempt(self.channel_id, outcome);
    }

    pub fn succeed(mut self, usage: TokenUsage) {
        self.emit(usage, None);
    }

    pub fn fail(mut self, failure: AttemptFailure, usage: TokenUsage) {
        self.emit(usage, Some(failure));
    }

    fn emit(&mut self, usage: TokenUsage, failure: Option<AttemptFailure>) {
        if self.emitted {
            return;
        }
        self.emitted = true;

        let status = if failure.is_some() {
            RequestStatus::Error
        } else {
            RequestStatus::Success
        };
        let latency_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let record = RequestLog {
            channel_id: self.channel_id,
            request_id: self.request_id.clone(),
            model_name: self.display_model.clone(),
            upstream_model: self.upstream_model.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            request_time: self.request_time,
            response_time: Utc::now(),
            latency_ms,
            status,
            error_code: failure.as_ref().map(AttemptFailure::code),
            error_message: failure.map(|f| f.message),
            ip_address: self.client_ip.clone(),
            is_streaming: self.streaming,
        };

        tracing::info!(
            request_id = %record.request_id,
            channel_id = record.channel_id,
            model = %record.model_name,
            upstream_model = %record.upstream_model,
            status = record.status.as_str(),
            error_code = record.error_code.as_deref().unwrap_or(""),
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            latency_ms = record.latency_ms,
            "request completed"
        );

        self.metrics.record(&record);
        middleware::audit::log_async(self.sink.clone(), record);
    }
}

impl Drop for RequestAudit {
    fn drop(&mut self) {
        if !self.emitted {
            let failure = AttemptFailure::new(
                FailureStage::ClientClosed,
                None,
                "client disconnected before the request completed",
            );
            self.emit(TokenUsage::default(), Some(failure));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::resolver::FallbackTarget;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording(Mutex<Vec<RequestLog>>);

    #[async_trait]
    impl LogSink for Recording {
        async fn append(&self, record: &RequestLog) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn accountant() -> (UsageAccountant, Arc<Recording>) {
        let sink = Arc::new(Recording::default());
        let metrics = Arc::new(PrometheusRecorder::new().unwrap());
        (UsageAccountant::new(sink.clone(), metrics), sink)
    }

    async fn settle(sink: &Recording) -> Vec<RequestLog> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        sink.0.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_success_record() {
        let (acct, sink) = accountant();
        let mut audit = acct.begin("rid".into(), "claude", "10.0.0.1".into(), true);
        let fallback = FallbackTarget {
            base_url: "https://api.anthropic.com".into(),
            timeout: Duration::from_secs(1),
        };
        audit.attempting(&Candidate::fallback("claude", None, &fallback));
        audit.attempt_finished(None);
        audit.succeed(TokenUsage::new(10, 3));

        let logs = settle(&sink).await;
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        assert_eq!(log.request_id, "rid");
        assert_eq!(log.channel_id, 0);
        assert_eq!(log.status, RequestStatus::Success);
        assert_eq!(log.total_tokens, 13);
        assert!(log.is_streaming);
        assert!(log.error_code.is_none());
        assert!(log.response_time >= log.request_time);
    }

    #[tokio::test]
    async fn test_failure_record_carries_code() {
        let (acct, sink) = accountant();
        let audit = acct.begin("rid".into(), "claude", "ip".into(), false);
        audit.fail(
            AttemptFailure::new(FailureStage::HttpRequest, Some(502), "dial tcp"),
            TokenUsage::default(),
        );

        let logs = settle(&sink).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, RequestStatus::Error);
        assert_eq!(logs[0].error_code.as_deref(), Some("502:http_request"));
        assert_eq!(logs[0].error_message.as_deref(), Some("dial tcp"));
    }

    #[tokio::test]
    async fn test_drop_emits_client_closed_once() {
        let (acct, sink) = accountant();
        drop(acct.begin("rid".into(), "claude", "ip".into(), true));

        let logs = settle(&sink).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error_code.as_deref(), Some("client_closed"));
    }
}
