//! Prometheus metrics recorder for the gateway.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Metrics are updated once per logical request via `record()` and once per
//! upstream attempt via `record_attempt()`.

use prometheus::{histogram_opts, opts, CounterVec, Encoder, HistogramVec, Registry, TextEncoder};

use crate::models::audit::RequestLog;

/// Prometheus metrics recorder.
/// Owns its registry so several gateways (tests) can coexist in one process.
pub struct PrometheusRecorder {
    registry: Registry,

    // Counters
    requests_total: CounterVec,
    tokens_total: CounterVec,
    errors_total: CounterVec,
    channel_attempts_total: CounterVec,

    // Histograms
    request_duration_seconds: HistogramVec,
}

impl PrometheusRecorder {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            opts!("gateway_requests_total", "Total number of proxied requests"),
            &["model", "status", "is_streaming"],
        )?;
        let tokens_total = CounterVec::new(
            opts!("gateway_tokens_total", "Total tokens consumed"),
            &["model", "type"],
        )?;
        let errors_total = CounterVec::new(
            opts!("gateway_errors_total", "Failed requests by error code"),
            &["model", "error_code"],
        )?;
        let channel_attempts_total = CounterVec::new(
            opts!("gateway_channel_attempts_total", "Upstream attempts per channel"),
            &["channel_id", "outcome"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "gateway_request_duration_seconds",
                "Request latency in seconds",
                // LLM-optimized buckets: 100ms to 120s
                vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
            ),
            &["model", "status"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(channel_attempts_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            tokens_total,
            errors_total,
            channel_attempts_total,
            request_duration_seconds,
        })
    }

    /// Record metrics for a completed logical request.
    pub fn record(&self, log: &RequestLog) {
        let model = log.model_name.as_str();
        let status = log.status.as_str();
        let is_streaming = if log.is_streaming { "true" } else { "false" };

        self.requests_total
            .with_label_values(&[model, status, is_streaming])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[model, status])
            .observe(log.latency_ms as f64 / 1000.0);

        if log.input_tokens > 0 {
            self.tokens_total
                .with_label_values(&[model, "input"])
                .inc_by(f64::from(log.input_tokens));
        }
        if log.output_tokens > 0 {
            self.tokens_total
                .with_label_values(&[model, "output"])
                .inc_by(f64::from(log.output_tokens));
        }

        if let Some(code) = &log.error_code {
            self.errors_total
                .with_label_values(&[model, code.as_str()])
                .inc();
        }
    }

    /// Count one upstream attempt; `outcome` is `success` or a failure stage.
    pub fn record_attempt(&self, channel_id: i64, outcome: &str) {
        let channel_id = channel_id.to_string();
        self.channel_attempts_total
            .with_label_values(&[channel_id.as_str(), outcome])
            .inc();
    }

    /// Encode all registered metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────
