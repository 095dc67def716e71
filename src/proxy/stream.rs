//! Incremental SSE translation between upstream and downstream protocols.
//!
//! `StreamTranslator` is a pure state machine: raw upstream bytes go in,
//! complete downstream SSE frames come out, and the running token counters
//! live in `StreamState`. The I/O side (`FrameSink`) is kept separate so
//! the pump can write and flush each frame individually.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::json;
use std::io;
use tokio::sync::mpsc;

use super::sse::{classify, LineTooLong, SseField, SseLineDecoder};
use crate::models::anthropic::StreamEvent;
use crate::models::openai::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
use crate::models::{Protocol, TokenUsage};

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// How upstream frames are turned into downstream frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// OpenAI chunks in, OpenAI chunks out. Counters untouched.
    Passthrough,
    /// Anthropic events in and out, metered.
    AnthropicPassthrough,
    /// Anthropic events in, OpenAI chunks out.
    AnthropicToOpenAi,
    /// OpenAI chunks in, Anthropic events out.
    OpenAiToAnthropic,
}

impl StreamMode {
    pub fn select(inbound: Protocol, upstream: Protocol) -> Self {
        match (inbound, upstream) {
            (Protocol::OpenAi, Protocol::OpenAi) => StreamMode::Passthrough,
            (Protocol::Anthropic, Protocol::Anthropic) => StreamMode::AnthropicPassthrough,
            (Protocol::OpenAi, Protocol::Anthropic) => StreamMode::AnthropicToOpenAi,
            (Protocol::Anthropic, Protocol::OpenAi) => StreamMode::OpenAiToAnthropic,
        }
    }
}

/// Request-scoped streaming state.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Synthetic id stamped on every emitted chunk.
    pub completion_id: String,
    committed: bool,
}

impl StreamState {
    pub fn new(request_id: &str) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            completion_id: format!("chatcmpl-{}", request_id.replace('-', "")),
            committed: false,
        }
    }

    /// Irreversible: once set, no other candidate may be attempted.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.input_tokens, self.output_tokens)
    }
}

/// Progress of a synthesized Anthropic message (OpenAI upstream).
#[derive(Debug, Default)]
struct MessageFraming {
    started: bool,
    closed: bool,
    stop_reason: Option<String>,
}

pub struct StreamTranslator {
    mode: StreamMode,
    /// Display model echoed to the caller.
    model: String,
    created: i64,
    lines: SseLineDecoder,
    state: StreamState,
    /// `event:` line waiting for its `data:` line.
    pending_event: Option<String>,
    framing: MessageFraming,
}

impl StreamTranslator {
    pub fn new(mode: StreamMode, model: impl Into<String>, state: StreamState) -> Self {
        Self {
            mode,
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            lines: SseLineDecoder::new(),
            state,
            pending_event: None,
            framing: MessageFraming::default(),
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Consume one upstream chunk, returning the frames it completed in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, LineTooLong> {
        let mut frames = Vec::new();
        for line in self.lines.push(chunk)? {
            self.on_line(&line, &mut frames);
        }
        Ok(frames)
    }

    /// Upstream reached EOF. Flushes a trailing partial line and closes a
    /// synthesized Anthropic message that never saw `[DONE]`.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.on_line(&line, &mut frames);
        }
        if self.mode == StreamMode::OpenAiToAnthropic && self.framing.started {
            self.close_message(&mut frames);
        }
        frames
    }

    fn on_line(&mut self, line: &str, frames: &mut Vec<Bytes>) {
        match classify(line) {
            SseField::Blank => self.pending_event = None,
            SseField::Event(_) => self.pending_event = Some(line.to_string()),
            SseField::Data(payload) if !payload.is_empty() => self.on_data(line, payload, frames),
            SseField::Data(_) | SseField::Comment | SseField::Other => {}
        }
    }

    fn on_data(&mut self, line: &str, payload: &str, frames: &mut Vec<Bytes>) {
        match self.mode {
            StreamMode::Passthrough => frames.push(Bytes::from(format!("{}\n\n", line))),
            StreamMode::AnthropicPassthrough => {
                if let Some(event) = decode::<StreamEvent>(payload) {
                    self.meter(&event);
                }
                let frame = match self.pending_event.take() {
                    Some(event_line) => format!("{}\n{}\n\n", event_line, line),
                    None => format!("{}\n\n", line),
                };
                frames.push(Bytes::from(frame));
            }
            StreamMode::AnthropicToOpenAi => {
                if let Some(event) = decode::<StreamEvent>(payload) {
                    self.meter(&event);
                    self.translate_event(event, frames);
                }
            }
            StreamMode::OpenAiToAnthropic => self.translate_chunk(payload, frames),
        }
    }

    /// `message_start` sets input, `message_delta` overwrites output with
    /// the cumulative count Anthropic reports.
    fn meter(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(input) = message.usage.and_then(|u| u.input_tokens) {
                    self.state.input_tokens = input;
                }
            }
            StreamEvent::MessageDelta { usage: Some(usage) } => {
                if let Some(output) = usage.output_tokens {
                    self.state.output_tokens = output;
                }
            }
            _ => {}
        }
    }

    // ── Anthropic → OpenAI ──────────────────────────────────────

    fn translate_event(&mut self, event: StreamEvent, frames: &mut Vec<Bytes>) {
        match event {
            StreamEvent::MessageStart { .. } => {
                let delta = ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                };
                frames.extend(self.openai_chunk(delta, None));
            }
            StreamEvent::ContentBlockDelta { delta } => {
                if let Some(text) = delta.text {
                    let delta = ChunkDelta {
                        role: None,
                        content: Some(text),
                    };
                    frames.extend(self.openai_chunk(delta, None));
                }
            }
            StreamEvent::MessageStop => {
                frames.extend(self.openai_chunk(ChunkDelta::default(), Some("stop")));
                frames.push(Bytes::from_static(DONE_FRAME));
            }
            StreamEvent::MessageDelta { .. } | StreamEvent::Other => {}
        }
    }

    /// `None` when the chunk cannot be serialized; the frame is dropped.
    fn openai_chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> Option<Bytes> {
        let chunk = ChatCompletionChunk {
            id: self.state.completion_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage: None,
        };
        match serde_json::to_vec(&chunk) {
            Ok(json) => {
                let mut frame = BytesMut::with_capacity(json.len() + 8);
                frame.extend_from_slice(b"data: ");
                frame.extend_from_slice(&json);
                frame.extend_from_slice(b"\n\n");
                Some(frame.freeze())
            }
            Err(e) => {
                tracing::error!(id = %chunk.id, "failed to serialize completion chunk: {}", e);
                None
            }
        }
    }

    // ── OpenAI → Anthropic ──────────────────────────────────────

    fn translate_chunk(&mut self, payload: &str, frames: &mut Vec<Bytes>) {
        if payload == "[DONE]" {
            self.open_message(frames);
            self.close_message(frames);
            return;
        }
        let Some(chunk) = decode::<ChatCompletionChunk>(payload) else {
            return;
        };
        if self.framing.closed {
            return;
        }
        self.open_message(frames);

        if let Some(usage) = chunk.usage {
            self.state.input_tokens = usage.prompt_tokens;
            self.state.output_tokens = usage.completion_tokens;
        }
        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                frames.push(anthropic_frame(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": 0,
                        "delta": {"type": "text_delta", "text": text},
                    }),
                ));
            }
            if let Some(reason) = choice.finish_reason {
                self.framing.stop_reason = Some(anthropic_stop_reason(&reason).to_string());
            }
        }
    }

    fn open_message(&mut self, frames: &mut Vec<Bytes>) {
        if self.framing.started {
            return;
        }
        self.framing.started = true;
        frames.push(anthropic_frame(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.state.completion_id.replacen("chatcmpl-", "msg_", 1),
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": self.state.input_tokens, "output_tokens": 0},
                }
            }),
        ));
        frames.push(anthropic_frame(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""},
            }),
        ));
    }

    fn close_message(&mut self, frames: &mut Vec<Bytes>) {
        if self.framing.closed {
            return;
        }
        self.framing.closed = true;
        let stop_reason = self
            .framing
            .stop_reason
            .clone()
            .unwrap_or_else(|| "end_turn".to_string());
        frames.push(anthropic_frame(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 0}),
        ));
        frames.push(anthropic_frame(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"output_tokens": self.state.output_tokens},
            }),
        ));
        frames.push(anthropic_frame("message_stop", json!({"type": "message_stop"})));
    }
}

/// Parse a `data:` payload, skipping (not failing on) malformed JSON.
fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("skipping undecodable SSE payload: {}", e);
            None
        }
    }
}

fn anthropic_frame(event: &str, data: serde_json::Value) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
}

pub(crate) fn anthropic_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

// ── Sinks ───────────────────────────────────────────────────────

/// Downstream transport for translated frames. `write` may buffer;
/// nothing is guaranteed to reach the caller until `flush`.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write(&mut self, frame: Bytes) -> io::Result<()>;
    async fn flush(&mut self) -> io::Result<()>;
    /// Resolves once the caller has gone away.
    async fn closed(&self);
}

/// `FrameSink` feeding an axum streaming body through an mpsc channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    pending: BytesMut,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<Bytes, io::Error>>) -> Self {
        Self {
            tx,
            pending: BytesMut::new(),
        }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn write(&mut self, frame: Bytes) -> io::Result<()> {
        if self.tx.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"));
        }
        self.pending.extend_from_slice(&frame);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
