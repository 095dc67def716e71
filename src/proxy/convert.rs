//! Non-streaming body conversion between the OpenAI Chat Completions and
//! Anthropic Messages formats.
//!
//! The conversion is text-only: images, tool calls and other
//! structured blocks are dropped when crossing protocols. Same-protocol
//! traffic is passed through with only the model name substituted.

use serde_json::{json, Map, Value};

use super::stream::anthropic_stop_reason;
use crate::models::anthropic::{AnthropicMessage, AnthropicUsage, MessagesRequest, MessagesResponse};
use crate::models::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatUsage, Choice, StopSequences,
};
use crate::models::{ContentBlock, InboundRequest, MessageContent, Protocol, TokenUsage};

/// Anthropic requires `max_tokens`; OpenAI callers often omit it.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// ═══════════════════════════════════════════════════════════════
// Request direction
// ═══════════════════════════════════════════════════════════════

/// Serialize the outbound body for `target`, substituting the upstream model.
pub fn upstream_request_body(
    request: &InboundRequest,
    target: Protocol,
    upstream_model: &str,
) -> Result<Vec<u8>, serde_json::Error> {
    match (request, target) {
        (InboundRequest::Anthropic(req), Protocol::Anthropic) => {
            let mut req = req.clone();
            req.model = upstream_model.to_string();
            serde_json::to_vec(&req)
        }
        (InboundRequest::OpenAi(req), Protocol::OpenAi) => {
            let mut req = req.clone();
            req.model = upstream_model.to_string();
            serde_json::to_vec(&req)
        }
        (InboundRequest::OpenAi(req), Protocol::Anthropic) => {
            serde_json::to_vec(&openai_to_anthropic_request(req, upstream_model))
        }
        (InboundRequest::Anthropic(req), Protocol::OpenAi) => {
            serde_json::to_vec(&anthropic_to_openai_request(req, upstream_model))
        }
    }
}

/// OpenAI Chat Completions request → Anthropic Messages request.
///
/// System messages are lifted into the top-level `system` field (joined
/// with newlines, in order). Every role other than `assistant` becomes
/// `user`.
pub fn openai_to_anthropic_request(req: &ChatCompletionRequest, upstream_model: &str) -> MessagesRequest {
    let mut system_parts = Vec::new();
    let mut messages = Vec::with_capacity(req.messages.len());

    for msg in &req.messages {
        let text = msg.text_content();
        if msg.role == "system" {
            system_parts.push(text);
            continue;
        }
        let role = if msg.role == "assistant" { "assistant" } else { "user" };
        messages.push(AnthropicMessage::text(role, text));
    }

    MessagesRequest {
        model: upstream_model.to_string(),
        max_tokens: Some(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(MessageContent::Text(system_parts.join("\n")))
        },
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req.stop.clone().map(StopSequences::into_vec),
        stream: req.stream,
        extra: Map::new(),
    }
}

/// Anthropic Messages request → OpenAI Chat Completions request.
pub fn anthropic_to_openai_request(req: &MessagesRequest, upstream_model: &str) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = req.system.as_ref().map(MessageContent::text).filter(|s| !s.is_empty()) {
        messages.push(ChatMessage::text("system", system));
    }
    for msg in &req.messages {
        let role = if msg.role == "assistant" { "assistant" } else { "user" };
        messages.push(ChatMessage::text(role, msg.content.text()));
    }

    let mut extra = Map::new();
    if req.stream {
        // usage only arrives on the final chunk when asked for
        extra.insert("stream_options".to_string(), json!({"include_usage": true}));
    }

    ChatCompletionRequest {
        model: upstream_model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone().map(StopSequences::Many),
        stream: req.stream,
        extra,
    }
}

// ═══════════════════════════════════════════════════════════════
// Response direction
// ═══════════════════════════════════════════════════════════════

/// Turn an upstream success body into the caller's format and pull usage.
///
/// Passthrough bodies are returned as parsed JSON, untouched. A body that
/// is not JSON of the expected shape is an error for this candidate.
pub fn downstream_response(
    inbound: Protocol,
    upstream: Protocol,
    body: &[u8],
    display_model: &str,
) -> Result<(Value, TokenUsage), serde_json::Error> {
    match (inbound, upstream) {
        (Protocol::Anthropic, Protocol::Anthropic) => {
            let value: Value = serde_json::from_slice(body)?;
            let parsed: MessagesResponse = serde_json::from_value(value.clone())?;
            Ok((value, usage_from_anthropic(&parsed.usage)))
        }
        (Protocol::OpenAi, Protocol::OpenAi) => {
            let value: Value = serde_json::from_slice(body)?;
            let parsed: ChatCompletionResponse = serde_json::from_value(value.clone())?;
            Ok((value, usage_from_openai(&parsed.usage)))
        }
        (Protocol::OpenAi, Protocol::Anthropic) => {
            let parsed: MessagesResponse = serde_json::from_slice(body)?;
            let usage = usage_from_anthropic(&parsed.usage);
            let converted = anthropic_to_openai_response(&parsed, display_model);
            Ok((serde_json::to_value(converted)?, usage))
        }
        (Protocol::Anthropic, Protocol::OpenAi) => {
            let parsed: ChatCompletionResponse = serde_json::from_slice(body)?;
            let usage = usage_from_openai(&parsed.usage);
            let converted = openai_to_anthropic_response(&parsed, display_model);
            Ok((serde_json::to_value(converted)?, usage))
        }
    }
}

/// Anthropic Messages response → OpenAI Chat Completions response.
pub fn anthropic_to_openai_response(resp: &MessagesResponse, display_model: &str) -> ChatCompletionResponse {
    let finish_reason = match resp.stop_reason.as_deref() {
        Some("max_tokens") => "length",
        _ => "stop",
    };
    let usage = &resp.usage;

    ChatCompletionResponse {
        id: resp.id.clone(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: display_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage::text("assistant", resp.text()),
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: ChatUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens.saturating_add(usage.output_tokens),
        },
    }
}

/// OpenAI Chat Completions response → Anthropic Messages response.
/// Only the first choice is kept.
pub fn openai_to_anthropic_response(resp: &ChatCompletionResponse, display_model: &str) -> MessagesResponse {
    let first = resp.choices.first();
    let text = first.map(|c| c.message.text_content()).unwrap_or_default();
    let stop_reason = first
        .and_then(|c| c.finish_reason.as_deref())
        .map(anthropic_stop_reason)
        .unwrap_or("end_turn");

    MessagesResponse {
        id: resp.id.clone(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ContentBlock::text(text)],
        model: display_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
    }
}

fn usage_from_anthropic(usage: &AnthropicUsage) -> TokenUsage {
    TokenUsage::new(usage.input_tokens, usage.output_tokens)
}

fn usage_from_openai(usage: &ChatUsage) -> TokenUsage {
    TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)
}
