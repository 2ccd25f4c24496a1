use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Clone, PartialEq)]
pub(crate) struct OpenAiChatBody<'a> {
    pub(crate) model: &'a str,
    pub(crate) messages: Vec<OpenAiMessage<'a>>,
    pub(crate) temperature: f64,
    pub(crate) user: String,
    pub(crate) max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub(crate) struct OpenAiMessage<'a> {
    pub(crate) role: &'static str,
    pub(crate) content: &'a str,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub(crate) struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    pub(crate) kind: &'static str,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiChatResponse {
    #[serde(default)]
    pub(crate) choices: Vec<OpenAiResponseChoice>,
    #[serde(default)]
    pub(crate) usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiResponseChoice {
    #[serde(default)]
    pub(crate) message: Option<OpenAiResponseMessage>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiResponseMessage {
    #[serde(default)]
    pub(crate) content: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub(crate) struct OpenAiUsage {
    #[serde(default)]
    pub(crate) prompt_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiStreamChunk {
    #[serde(default)]
    pub(crate) choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiStreamChoice {
    #[serde(default)]
    pub(crate) delta: Option<OpenAiStreamDelta>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiStreamDelta {
    #[serde(default)]
    pub(crate) role: Option<String>,
    #[serde(default)]
    pub(crate) content: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub(crate) struct OpenAiImageBody<'a> {
    pub(crate) model: &'static str,
    pub(crate) prompt: &'a str,
    pub(crate) n: u32,
    pub(crate) size: &'a str,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiImageResponse {
    #[serde(default)]
    pub(crate) data: Vec<OpenAiImageData>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct OpenAiImageData {
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) revised_prompt: Option<String>,
}
