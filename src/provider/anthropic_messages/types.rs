use serde::{Deserialize, Serialize};

/// Request payload for the Messages API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct AnthropicMessagesBody<'a> {
    pub(crate) model: &'a str,
    pub(crate) messages: Vec<AnthropicMessage<'a>>,
    /// System-role messages folded into one field; absent when there are none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<String>,
    pub(crate) temperature: f64,
    pub(crate) max_tokens: u32,
    pub(crate) metadata: AnthropicMetadata,
    pub(crate) stop_sequences: [&'static str; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct AnthropicMessage<'a> {
    pub(crate) role: &'static str,
    pub(crate) content: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct AnthropicMetadata {
    pub(crate) user_id: String,
}

/// Non-streaming response payload returned by Anthropic Messages.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicMessageResponse {
    /// Ordered list of content blocks.
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicContentBlock {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

/// Usage counters returned by Anthropic.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub(crate) input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<u64>,
}

/// Streamed event, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStreamMessage,
    },
    ContentBlockDelta {
        delta: AnthropicTextDelta,
    },
    MessageDelta {
        delta: AnthropicStopDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStreamMessage {
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicTextDelta {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStopDelta {
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}
