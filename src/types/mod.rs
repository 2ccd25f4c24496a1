//! Provider-agnostic request and response shapes.
//!
//! Everything downstream of a provider adapter (callers, usage logging, cost
//! calculation) depends only on the types in this module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ProviderFamily, ProviderKind};

/// Finish reasons that count as a successful generation.
pub const ACCEPTED_FINISH_REASONS: [&str; 3] = ["stop", "end_turn", "stop_sequence"];

/// Finish reason reported when a response carries none.
pub const UNDEFINED_FINISH_REASON: &str = "Undefined finish reason";

/// Returns `true` when `reason` is one of [`ACCEPTED_FINISH_REASONS`].
pub fn is_accepted_finish_reason(reason: &str) -> bool {
    ACCEPTED_FINISH_REASONS.contains(&reason)
}

/// Chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat request shared across all providers.
///
/// Message order is caller intent and is preserved by every query builder, except
/// that Anthropic lifts `system` messages into a top-level field.
///
/// # Examples
///
/// ```
/// use modelgate::types::{ChatRequest, Message};
///
/// let request = ChatRequest::new(vec![
///     Message::system("You are concise."),
///     Message::user("Summarize Rust traits."),
/// ])
/// .with_temperature(0.3)
/// .with_max_tokens(512)
/// .json();
///
/// assert_eq!(request.messages.len(), 2);
/// assert!(request.wants_json);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Ordered list of messages to send.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f64,
    /// Maximum number of output tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whether the caller expects a JSON object back.
    #[serde(default)]
    pub wants_json: bool,
}

/// Output token budget used when the caller does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl ChatRequest {
    /// Creates a request with temperature `0`, [`DEFAULT_MAX_TOKENS`] and plain-text output.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: 0.0,
            max_tokens: DEFAULT_MAX_TOKENS,
            wants_json: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Asks the provider for a JSON object response.
    pub fn json(mut self) -> Self {
        self.wants_json = true;
        self
    }

    /// Message contents joined with newlines, in request order.
    pub(crate) fn joined_contents(&self) -> String {
        self.messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Token accounting in the canonical prompt/completion split.
///
/// `total_tokens` is always derived from the other two counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Builds usage counts; the total is the sum of both sides.
    ///
    /// # Examples
    ///
    /// ```
    /// use modelgate::types::Usage;
    ///
    /// let usage = Usage::new(2, 1);
    /// assert_eq!(usage.total_tokens, 3);
    /// ```
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// The single result shape produced for every provider, streamed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Generated text.
    pub content: String,
    /// Provider finish reason, verbatim (`stop`, `end_turn`, `length`, ...).
    pub finish_reason: String,
    pub usage: Usage,
    /// Whether the response was folded from a chunk stream.
    #[serde(default)]
    pub streamed: bool,
    /// Raw provider payload, or `null` for streamed responses.
    #[serde(default)]
    pub raw: Value,
}

impl NormalizedResponse {
    /// Returns `true` when the finish reason is in the accepted terminal set.
    pub fn is_success(&self) -> bool {
        is_accepted_finish_reason(&self.finish_reason)
    }

    /// Wraps a bare text body that carried no finish reason or usage.
    pub(crate) fn undefined(content: String) -> Self {
        Self {
            raw: Value::String(content.clone()),
            content,
            finish_reason: UNDEFINED_FINISH_REASON.to_string(),
            usage: Usage::default(),
            streamed: false,
        }
    }
}

/// Provider kind plus model identifier the gateway currently targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub model: String,
}

impl ProviderProfile {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
        }
    }

    pub fn family(&self) -> ProviderFamily {
        self.kind.family()
    }
}

/// Identity of the caller on whose behalf the gateway runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Option<u64>,
    pub team_id: Option<u64>,
    pub ip: Option<String>,
}

impl Caller {
    pub fn user(user_id: u64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn with_team(mut self, team_id: u64) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// User identifier as forwarded to providers; empty when anonymous.
    pub(crate) fn user_tag(&self) -> String {
        self.user_id.map(|id| id.to_string()).unwrap_or_default()
    }
}
