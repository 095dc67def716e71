//! Anthropic Messages API wire types.
//!
//! Only the fields the gateway reads or rewrites are typed. Everything
//! else lands in `extra` so same-protocol passthrough does not lose data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{null_as_default, ContentBlock, MessageContent};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub messages: Vec<AnthropicMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnthropicMessage {
    pub fn text(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(text),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "message_type")]
    pub kind: String,
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub usage: AnthropicUsage,
}

impl MessagesResponse {
    /// Concatenation of every `text` block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect()
    }
}

fn message_type() -> String {
    "message".to_string()
}

fn assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

// ── Streaming events ────────────────────────────────────────────

/// A decoded `data:` payload from an Anthropic event stream.
/// Unknown `type` values fall into `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: StreamMessage,
    },
    ContentBlockDelta {
        #[serde(default)]
        delta: BlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub usage: Option<DeltaUsage>,
}

/// `text_delta` carries `text`; `input_json_delta` and friends do not.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockDelta {
    #[serde(default)]
    pub text: Option<String>,
}

/// Usage as reported mid-stream; either counter may be absent.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeltaUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_discrimination() {
        let ev: StreamEvent = serde_json::from_value(json!({
            "type": "message_start",
            "message": {"id": "msg_1", "usage": {"input_tokens": 12, "output_tokens": 1}}
        }))
        .unwrap();
        match ev {
            StreamEvent::MessageStart { message } => {
                assert_eq!(message.usage.and_then(|u| u.input_tokens), Some(12));
            }
            other => panic!("unexpected {:?}", other),
        }

        let ev: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": "Hi"}
        }))
        .unwrap();
        assert!(matches!(ev, StreamEvent::ContentBlockDelta { delta } if delta.text.as_deref() == Some("Hi")));

        let ev: StreamEvent = serde_json::from_value(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn", "stop_sequence": null},
            "usage": {"output_tokens": 3}
        }))
        .unwrap();
        assert!(matches!(ev, StreamEvent::MessageDelta { usage: Some(u) } if u.output_tokens == Some(3)));

        let ev: StreamEvent = serde_json::from_value(json!({"type": "message_stop"})).unwrap();
        assert!(matches!(ev, StreamEvent::MessageStop));
    }

    #[test]
    fn test_unknown_events_are_other() {
        for raw in [
            json!({"type": "ping"}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_stop", "index": 0}),
        ] {
            let ev: StreamEvent = serde_json::from_value(raw).unwrap();
            assert!(matches!(ev, StreamEvent::Other));
        }
    }

    #[test]
    fn test_response_defaults_are_lenient() {
        let resp: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "a"}, {"type": "thinking", "thinking": "..."}, {"type": "text", "text": "b"}]
        }))
        .unwrap();
        assert_eq!(resp.kind, "message");
        assert_eq!(resp.role, "assistant");
        assert_eq!(resp.text(), "ab");
        assert_eq!(resp.usage.input_tokens, 0);
    }

    #[test]
    fn test_request_passthrough_keeps_unknown_fields() {
        let raw = json!({
            "model": "claude-x",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "hi"}],
            "metadata": {"user_id": "u1"},
            "thinking": {"type": "enabled", "budget_tokens": 1024}
        });
        let req: MessagesRequest = serde_json::from_value(raw.clone()).unwrap();
        assert!(!req.stream);
        assert_eq!(serde_json::to_value(&req).unwrap(), raw);
    }
}
