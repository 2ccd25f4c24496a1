use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Status carried next to every [`AiError`] message.
///
/// Callers use it to pick a retry or user-messaging policy: HTTP failures keep the
/// upstream status code, semantic failures keep the provider's finish reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiStatus {
    /// HTTP status reported by the upstream provider.
    Http(u16),
    /// Provider finish reason or a locally classified reason string.
    Reason(String),
    /// No status could be determined.
    Unknown,
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiStatus::Http(code) => write!(f, "{code}"),
            AiStatus::Reason(reason) => f.write_str(reason),
            AiStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Every failure surfaced by the gateway.
///
/// Whatever the variant, [`AiError::message`] and [`AiError::status`] expose the
/// `(message, status)` pair callers branch on.
#[derive(Debug, Error)]
pub enum AiError {
    /// Network or IO failure before a response body could be read.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// HTTP status when the failure happened after headers were received.
        status: Option<u16>,
    },
    /// Reports invalid or missing credentials.
    #[error("auth failure: {message}")]
    Auth { message: String, status: u16 },
    /// Indicates that the provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// The prompt or expected completion exceeds the allowed token budget.
    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded { message: String, status: u16 },
    /// A requested model could not be resolved by the provider.
    #[error("model not found: {message}")]
    ModelNotFound {
        /// Model identifier extracted from the error payload when available.
        model: Option<String>,
        message: String,
        status: u16,
    },
    /// Provider-side failure that does not fit a narrower variant.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Provider name, such as `openai_chat`.
        provider: &'static str,
        message: String,
        status: Option<u16>,
    },
    /// The request was rejected by the provider or could not be serialized locally.
    #[error("invalid request: {message}")]
    Validation {
        message: String,
        /// Upstream status; `None` when the request never left the process.
        status: Option<u16>,
    },
    /// Raised when resolving provider configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
    /// The call succeeded at the HTTP level but finished with an unaccepted reason.
    #[error("{message}")]
    Semantic {
        message: String,
        finish_reason: String,
    },
    /// Zero results where at least one was expected.
    #[error("empty result: {message}")]
    EmptyResult { message: String },
}

impl AiError {
    /// Creates an [`AiError::Transport`] without an HTTP status.
    ///
    /// # Examples
    ///
    /// ```
    /// use modelgate::error::{AiError, AiStatus};
    ///
    /// let err = AiError::transport("dns lookup failed");
    /// assert_eq!(err.message(), "dns lookup failed");
    /// assert_eq!(err.status(), AiStatus::Unknown);
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Creates an [`AiError::Provider`] for the named provider.
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            status: None,
        }
    }

    /// Human-readable message, without the variant prefix used by `Display`.
    pub fn message(&self) -> &str {
        match self {
            AiError::Transport { message, .. }
            | AiError::Auth { message, .. }
            | AiError::RateLimit { message, .. }
            | AiError::TokenLimitExceeded { message, .. }
            | AiError::ModelNotFound { message, .. }
            | AiError::Provider { message, .. }
            | AiError::Validation { message, .. }
            | AiError::Semantic { message, .. }
            | AiError::EmptyResult { message } => message,
            AiError::InvalidConfig { reason, .. } => reason,
        }
    }

    /// Provider-reported or locally classified status.
    ///
    /// # Examples
    ///
    /// ```
    /// use modelgate::error::{AiError, AiStatus};
    ///
    /// let err = AiError::Semantic {
    ///     message: "AI API error: length".into(),
    ///     finish_reason: "length".into(),
    /// };
    /// assert_eq!(err.status(), AiStatus::Reason("length".into()));
    /// ```
    pub fn status(&self) -> AiStatus {
        match self {
            AiError::Transport { status, .. } | AiError::Provider { status, .. } => {
                status.map_or(AiStatus::Unknown, AiStatus::Http)
            }
            AiError::Auth { status, .. }
            | AiError::TokenLimitExceeded { status, .. }
            | AiError::ModelNotFound { status, .. } => AiStatus::Http(*status),
            AiError::RateLimit { .. } => AiStatus::Http(429),
            AiError::Semantic { finish_reason, .. } => AiStatus::Reason(finish_reason.clone()),
            AiError::Validation {
                status: Some(status),
                ..
            } => AiStatus::Http(*status),
            AiError::Validation { status: None, .. } | AiError::InvalidConfig { .. } => {
                AiStatus::Reason("invalid_request".to_string())
            }
            AiError::EmptyResult { .. } => AiStatus::Unknown,
        }
    }
}

/// Maps an upstream HTTP error to the matching [`AiError`] variant.
///
/// `message` is the provider's error text, `code_hint` its machine-readable error code
/// when one was present in the body.
pub(crate) fn classify_http_error(
    provider: &'static str,
    status: u16,
    message: String,
    code_hint: Option<&str>,
    retry_after: Option<Duration>,
) -> AiError {
    if looks_like_token_limit_error(code_hint, &message) {
        return AiError::TokenLimitExceeded { message, status };
    }

    if status == 404 || matches!(code_hint, Some("not_found" | "model_not_found")) {
        return AiError::ModelNotFound {
            model: extract_model_identifier(&message),
            message,
            status,
        };
    }

    match status {
        401 | 403 => AiError::Auth { message, status },
        429 => AiError::RateLimit {
            message,
            retry_after,
        },
        400 | 422 => AiError::Validation {
            message,
            status: Some(status),
        },
        _ => AiError::Provider {
            provider,
            message,
            status: Some(status),
        },
    }
}

/// Returns `true` when an error code or message suggests a context/window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) || lower.contains("token")
        {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 6] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Attempts to extract a model identifier from an error payload.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    ['`', '"', '\'']
        .into_iter()
        .filter_map(|delimiter| between_delimiters(message, delimiter))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn between_delimiters(message: &str, delimiter: char) -> Option<String> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let end = message[start..].find(delimiter)?;
    Some(message[start..start + end].to_string())
}
