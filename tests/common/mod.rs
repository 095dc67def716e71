//! Shared fixtures for the gateway integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

use gateway::config::Config;
use gateway::models::audit::RequestLog;
use gateway::models::channel::{NewChannel, NewMapping};
use gateway::store::sqlite::SqliteStore;
use gateway::store::LogSink;
use gateway::AppState;

/// LogSink that keeps every record in memory.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<RequestLog>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<RequestLog> {
        self.records.lock().unwrap().clone()
    }

    /// Records are written from a spawned task; give it a moment.
    pub async fn settled(&self) -> Vec<RequestLog> {
        for _ in 0..50 {
            if !self.records.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // catch any erroneous second record
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.records()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn append(&self, record: &RequestLog) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// LogSink that always fails.
pub struct FailingSink;

#[async_trait]
impl LogSink for FailingSink {
    async fn append(&self, _: &RequestLog) -> anyhow::Result<()> {
        anyhow::bail!("log database unavailable")
    }
}

pub struct Gateway {
    pub store: SqliteStore,
    pub logs: Arc<RecordingSink>,
    pub router: Router,
}

pub fn config(fallback_url: &str) -> Config {
    Config {
        default_upstream_url: fallback_url.to_string(),
        upstream_timeout_secs: 5,
        ..Config::default()
    }
}

pub async fn gateway(config: Config) -> Gateway {
    let store = SqliteStore::in_memory().await.unwrap();
    let logs = Arc::new(RecordingSink::default());
    let state = AppState::new(config, Arc::new(store.clone()), logs.clone()).unwrap();
    Gateway {
        store,
        logs,
        router: gateway::app(Arc::new(state)),
    }
}

pub async fn gateway_with_sink(config: Config, sink: Arc<dyn LogSink>) -> (SqliteStore, Router) {
    let store = SqliteStore::in_memory().await.unwrap();
    let state = AppState::new(config, Arc::new(store.clone()), sink).unwrap();
    (store, gateway::app(Arc::new(state)))
}

pub async fn add_channel(store: &SqliteStore, name: &str, base_url: &str, provider: &str, priority: i64) -> i64 {
    store
        .insert_channel(&NewChannel {
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_key: format!("sk-{}", name),
            provider: provider.to_string(),
            is_active: true,
            priority,
            timeout: 5,
        })
        .await
        .unwrap()
}

pub async fn add_mapping(store: &SqliteStore, channel_id: i64, upstream_model: &str, display_model: &str) {
    store
        .insert_mapping(&NewMapping {
            channel_id,
            upstream_model: upstream_model.to_string(),
            display_model: display_model.to_string(),
            is_enabled: true,
        })
        .await
        .unwrap();
}

pub async fn post(router: &Router, path: &str, body: &serde_json::Value, headers: &[(&str, &str)]) -> Response {
    let mut req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    router
        .clone()
        .oneshot(req.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn get(router: &Router, path: &str) -> Response {
    router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(resp: Response) -> Bytes {
    axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(resp: Response) -> (StatusCode, serde_json::Value) {
    let status = resp.status();
    let bytes = body_bytes(resp).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

pub fn anthropic_message(model: &str, text: &str, input: u32, output: u32) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "model": model,
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "usage": {"input_tokens": input, "output_tokens": output}
    })
}

/// Anthropic SSE stream: message_start(input) → deltas → message_delta(output) → message_stop.
pub fn anthropic_stream(deltas: &[&str], input: u32, output: u32) -> String {
    let mut out = format!(
        "event: message_start\ndata: {}\n\n",
        serde_json::json!({"type": "message_start", "message": {"id": "msg_01", "usage": {"input_tokens": input, "output_tokens": 1}}})
    );
    out.push_str("event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n");
    for text in deltas {
        out.push_str(&format!(
            "event: content_block_delta\ndata: {}\n\n",
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}})
        ));
    }
    out.push_str("event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n");
    out.push_str(&format!(
        "event: message_delta\ndata: {}\n\n",
        serde_json::json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": output}})
    ));
    out.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    out
}

/// Upstream that answers 200 with `frames`, then hangs up mid-body.
pub async fn truncating_upstream(frames: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: 1048576\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(frames.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    });
    format!("http://{}", addr)
}

async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + len {
                return;
            }
        }
    }
}
