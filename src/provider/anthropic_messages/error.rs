use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AiError, classify_http_error};

pub(crate) const PROVIDER_NAME: &str = "anthropic_messages";

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

/// Parses error responses returned by the Anthropic Messages API.
pub(crate) fn parse_anthropic_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> AiError {
    let Some(error) = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
    else {
        return classify_http_error(
            PROVIDER_NAME,
            status,
            format!("status {status}: {body}"),
            None,
            retry_after,
        );
    };

    let code = error
        .code
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
    if let Some(code) = &code {
        message = format!("{message} ({code})");
    }
    let hint = code.as_deref().or(error.kind.as_deref());
    classify_http_error(PROVIDER_NAME, status, message, hint, retry_after)
}

/// Reads an `error` event delivered inside a 2xx stream.
pub(crate) fn stream_error(payload: &Value) -> Option<AiError> {
    if payload.get("type").and_then(Value::as_str) != Some("error") {
        return None;
    }
    let error = payload.get("error");
    let message = error
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("stream error");
    let kind = error
        .and_then(|error| error.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("error");
    Some(AiError::Provider {
        provider: PROVIDER_NAME,
        message: format!("{message} ({kind})"),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth_and_rate_limit_errors() {
        let body = r#"{
  "type": "error",
  "error": {
    "type": "authentication_error",
    "message": "invalid x-api-key"
  }
}"#;
        let err = parse_anthropic_error(401, body, None);
        match err {
            AiError::Auth { message, status } => {
                assert_eq!(message, "invalid x-api-key");
                assert_eq!(status, 401);
            }
            other => panic!("expected Auth error, got {other:?}"),
        }

        let body = r#"{
  "error": {
    "type": "rate_limit_error",
    "message": "Too many requests",
    "code": "rate_limit_exceeded"
  }
}"#;
        let err = parse_anthropic_error(429, body, Some(Duration::from_secs(2)));
        match err {
            AiError::RateLimit {
                message,
                retry_after,
            } => {
                assert!(message.contains("Too many requests"));
                assert!(message.contains("rate_limit_exceeded"));
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("expected RateLimit error, got {other:?}"),
        }
    }

    #[test]
    fn parse_validation_and_provider_errors() {
        let body = r#"{"error": {"type": "invalid_request_error", "message": "Bad request"}}"#;
        assert!(matches!(
            parse_anthropic_error(400, body, None),
            AiError::Validation {
                status: Some(400),
                ..
            }
        ));

        let err = parse_anthropic_error(529, "not a json", None);
        match err {
            AiError::Provider {
                provider,
                message,
                status,
            } => {
                assert_eq!(provider, "anthropic_messages");
                assert!(message.contains("status 529: not a json"));
                assert_eq!(status, Some(529));
            }
            other => panic!("expected Provider fallback error, got {other:?}"),
        }
    }

    #[test]
    fn parse_anthropic_model_not_found() {
        let body = r#"{"error": {"type": "not_found_error", "message": "model: `claude-bogus`"}}"#;
        match parse_anthropic_error(404, body, None) {
            AiError::ModelNotFound { model, .. } => {
                assert_eq!(model.as_deref(), Some("claude-bogus"));
            }
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn parse_anthropic_token_limit_errors() {
        let body = r#"{"error": {"type": "invalid_request_error", "message": "prompt is too long: 210000 tokens > 200000 maximum"}}"#;
        assert!(matches!(
            parse_anthropic_error(400, body, None),
            AiError::TokenLimitExceeded { status: 400, .. }
        ));
    }

    #[test]
    fn stream_error_event() {
        let payload = serde_json::json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        });
        let err = stream_error(&payload).expect("error");
        assert_eq!(err.message(), "Overloaded (overloaded_error)");
        assert!(stream_error(&serde_json::json!({"type": "ping"})).is_none());
    }
}
