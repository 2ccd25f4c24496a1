use serde_json::Value;

use crate::error::AiError;
use crate::types::{NormalizedResponse, UNDEFINED_FINISH_REASON, Usage};

use super::error::PROVIDER_NAME;
use super::request::JSON_PRIMER;
use super::types::{AnthropicMessageResponse, AnthropicUsage};

/// Normalizes a Messages API body.
///
/// The first content block's text is trimmed, and repaired with
/// [`repair_primed_json`] when the query was primed for JSON.
pub(crate) fn normalize_anthropic(
    raw: Value,
    primed_for_json: bool,
) -> Result<NormalizedResponse, AiError> {
    let parsed: AnthropicMessageResponse =
        serde_json::from_value(raw.clone()).map_err(|err| AiError::Provider {
            provider: PROVIDER_NAME,
            message: format!("failed to parse Anthropic response: {err}"),
            status: None,
        })?;

    let text = parsed
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .unwrap_or_default();
    let mut content = text.trim().to_string();
    if primed_for_json {
        content = repair_primed_json(content);
    }

    Ok(NormalizedResponse {
        content,
        finish_reason: parsed
            .stop_reason
            .unwrap_or_else(|| UNDEFINED_FINISH_REASON.to_string()),
        usage: convert_usage(&parsed.usage.unwrap_or_default()),
        streamed: false,
        raw,
    })
}

pub(crate) fn convert_usage(usage: &AnthropicUsage) -> Usage {
    Usage::new(
        usage.input_tokens.unwrap_or_default(),
        usage.output_tokens.unwrap_or_default(),
    )
}

/// Restores the opening brace consumed by the JSON primer.
///
/// Content is only touched when it does not already start with `{` and a `}` follows
/// some `:`, which is the shape of an object body with its brace stripped.
pub(crate) fn repair_primed_json(content: String) -> String {
    let trimmed = content.trim_start();
    if trimmed.starts_with(JSON_PRIMER) {
        return content;
    }
    let looks_like_object_body = trimmed
        .find(':')
        .is_some_and(|colon| trimmed[colon..].contains('}'));
    if looks_like_object_body {
        format!("{JSON_PRIMER}{content}")
    } else {
        content
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message(text: &str, stop_reason: &str) -> Value {
        json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-haiku-20240307",
            "content": [{"type": "text", "text": text}],
            "stop_reason": stop_reason,
            "usage": {"input_tokens": 10, "output_tokens": 4}
        })
    }

    #[test]
    fn renames_usage_and_trims_text() {
        let raw = message("  Hello there \n", "end_turn");
        let response = normalize_anthropic(raw.clone(), false).expect("normalize");

        assert_eq!(response.content, "Hello there");
        assert_eq!(response.finish_reason, "end_turn");
        assert_eq!(response.usage, Usage::new(10, 4));
        assert_eq!(response.raw, raw);
        assert!(response.is_success());
    }

    #[test]
    fn primed_json_gets_its_brace_back() {
        let response =
            normalize_anthropic(message("\"key\": 1}", "end_turn"), true).expect("normalize");
        assert_eq!(response.content, "{\"key\": 1}");

        let response =
            normalize_anthropic(message("plain text", "end_turn"), true).expect("normalize");
        assert_eq!(response.content, "plain text");
    }

    #[test]
    fn unprimed_content_is_left_alone() {
        let response =
            normalize_anthropic(message("\"key\": 1}", "end_turn"), false).expect("normalize");
        assert_eq!(response.content, "\"key\": 1}");
    }

    #[test]
    fn repair_only_applies_to_object_bodies() {
        assert_eq!(repair_primed_json("{\"a\": 1}".into()), "{\"a\": 1}");
        assert_eq!(repair_primed_json("} then: x".into()), "} then: x");
        assert_eq!(repair_primed_json("a: {b}".into()), "{a: {b}");
        assert_eq!(repair_primed_json(String::new()), "");
    }

    #[test]
    fn missing_stop_reason_is_undefined() {
        let raw = json!({"content": [], "usage": {"input_tokens": 3}});
        let response = normalize_anthropic(raw, false).expect("normalize");
        assert_eq!(response.content, "");
        assert_eq!(response.finish_reason, UNDEFINED_FINISH_REASON);
        assert_eq!(response.usage, Usage::new(3, 0));
    }
}
