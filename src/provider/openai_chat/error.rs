use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AiError, classify_http_error};

pub(crate) const PROVIDER_NAME: &str = "openai_chat";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<InnerError>,
}

#[derive(Deserialize)]
struct InnerError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<Value>,
}

/// Maps a non-2xx OpenAI-compatible response to an [`AiError`].
pub(crate) fn parse_openai_error(status: u16, body: &str, retry_after: Option<Duration>) -> AiError {
    let parsed = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error);

    match parsed {
        Some(error) => {
            let code = error.code.as_ref().and_then(code_as_string);
            let hint = code.as_deref().or(error.kind.as_deref());
            let message = error
                .message
                .unwrap_or_else(|| "unknown error".to_string());
            classify_http_error(PROVIDER_NAME, status, message, hint, retry_after)
        }
        None => classify_http_error(
            PROVIDER_NAME,
            status,
            format!("status {status}: {body}"),
            None,
            retry_after,
        ),
    }
}

/// Reads an `error` object embedded in a 2xx stream chunk.
pub(crate) fn stream_error(payload: &Value) -> Option<AiError> {
    let error = payload.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stream error")
        .to_string();
    let status = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok());
    Some(AiError::Provider {
        provider: PROVIDER_NAME,
        message,
        status,
    })
}

fn code_as_string(code: &Value) -> Option<String> {
    match code {
        Value::String(code) => Some(code.clone()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_structured_errors() {
        let body = json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}
        })
        .to_string();
        match parse_openai_error(401, &body, None) {
            AiError::Auth { message, status } => {
                assert_eq!(message, "Incorrect API key provided");
                assert_eq!(status, 401);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let body = json!({
            "error": {"message": "This model's maximum context length is 8192 tokens", "code": "context_length_exceeded"}
        })
        .to_string();
        assert!(matches!(
            parse_openai_error(400, &body, None),
            AiError::TokenLimitExceeded { status: 400, .. }
        ));

        let body = json!({
            "error": {"message": "The model `gpt-9` does not exist", "code": "model_not_found"}
        })
        .to_string();
        match parse_openai_error(404, &body, None) {
            AiError::ModelNotFound { model, .. } => assert_eq!(model.as_deref(), Some("gpt-9")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn keeps_retry_after_on_rate_limit() {
        let body = json!({"error": {"message": "Rate limit reached"}}).to_string();
        match parse_openai_error(429, &body, Some(Duration::from_secs(20))) {
            AiError::RateLimit { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(20)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unstructured_body_keeps_status() {
        let err = parse_openai_error(502, "<html>Bad Gateway</html>", None);
        match err {
            AiError::Provider {
                status, message, ..
            } => {
                assert_eq!(status, Some(502));
                assert!(message.contains("Bad Gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn detects_errors_inside_stream_chunks() {
        let payload = json!({"error": {"message": "overloaded", "code": 503}});
        let err = stream_error(&payload).expect("error");
        assert_eq!(err.message(), "overloaded");
        assert!(stream_error(&json!({"choices": []})).is_none());
    }
}
