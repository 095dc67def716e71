pub mod anthropic;
pub mod audit;
pub mod channel;
pub mod openai;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use self::anthropic::MessagesRequest;
use self::openai::ChatCompletionRequest;

/// Wire protocol spoken by an inbound entrypoint or an upstream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Anthropic,
    OpenAi,
}

impl Protocol {
    /// Channel flavors other than `anthropic` speak the OpenAI dialect.
    pub fn from_flavor(flavor: &str) -> Self {
        if flavor.trim().eq_ignore_ascii_case("anthropic") {
            Protocol::Anthropic
        } else {
            Protocol::OpenAi
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Anthropic => "anthropic",
            Protocol::OpenAi => "openai",
        }
    }
}

/// Reads an explicit `null` as `T::default()`. Pair with `#[serde(default)]`
/// so a missing field behaves the same way.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Message content as both protocols accept it: a bare string or an
/// ordered list of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text of every text-bearing block. Images, tool blocks
    /// and anything else without a `text` field are dropped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.text.as_deref())
                .collect(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// A single content block. Only `type` and `text` are interpreted; the
/// rest is carried through untouched for same-protocol passthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One logical inbound call, kept in the wire format it arrived in.
#[derive(Debug, Clone)]
pub enum InboundRequest {
    Anthropic(MessagesRequest),
    OpenAi(ChatCompletionRequest),
}

impl InboundRequest {
    pub fn parse(protocol: Protocol, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match protocol {
            Protocol::Anthropic => InboundRequest::Anthropic(serde_json::from_slice(body)?),
            Protocol::OpenAi => InboundRequest::OpenAi(serde_json::from_slice(body)?),
        })
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            InboundRequest::Anthropic(_) => Protocol::Anthropic,
            InboundRequest::OpenAi(_) => Protocol::OpenAi,
        }
    }

    /// The display model the caller asked for.
    pub fn model(&self) -> &str {
        match self {
            InboundRequest::Anthropic(r) => &r.model,
            InboundRequest::OpenAi(r) => &r.model,
        }
    }

    pub fn is_stream(&self) -> bool {
        match self {
            InboundRequest::Anthropic(r) => r.stream,
            InboundRequest::OpenAi(r) => r.stream,
        }
    }
}
