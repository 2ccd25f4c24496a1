use serde_json::Value;

use crate::error::AiError;
use crate::types::{NormalizedResponse, UNDEFINED_FINISH_REASON, Usage};

use super::error::PROVIDER_NAME;
use super::types::{OpenAiChatResponse, OpenAiUsage};

/// Normalizes a Chat Completions body.
///
/// Only the first choice is read. A missing finish reason maps to
/// [`UNDEFINED_FINISH_REASON`] and missing usage to zero counts.
pub(crate) fn normalize_openai(raw: Value) -> Result<NormalizedResponse, AiError> {
    let parsed: OpenAiChatResponse =
        serde_json::from_value(raw.clone()).map_err(|err| AiError::Provider {
            provider: PROVIDER_NAME,
            message: format!("failed to parse OpenAI response: {err}"),
            status: None,
        })?;

    let choice = parsed.choices.into_iter().next();
    let finish_reason = choice
        .as_ref()
        .and_then(|choice| choice.finish_reason.clone())
        .unwrap_or_else(|| UNDEFINED_FINISH_REASON.to_string());
    let content = choice
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .unwrap_or_default();

    Ok(NormalizedResponse {
        content,
        finish_reason,
        usage: convert_usage(parsed.usage.unwrap_or_default()),
        streamed: false,
        raw,
    })
}

fn convert_usage(usage: OpenAiUsage) -> Usage {
    Usage::new(
        usage.prompt_tokens.unwrap_or_default(),
        usage.completion_tokens.unwrap_or_default(),
    )
}
