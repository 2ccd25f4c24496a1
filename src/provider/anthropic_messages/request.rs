use serde_json::Value;

use crate::config::ProviderFamily;
use crate::provider::ProviderQuery;
use crate::types::{Caller, ChatRequest, ProviderProfile, Role};

use super::types::{AnthropicMessage, AnthropicMessagesBody, AnthropicMetadata};

const STOP_SEQUENCES: [&str; 2] = ["<stop>", "<wrapup>"];

/// Partial assistant turn appended when the caller asked for JSON.
pub(crate) const JSON_PRIMER: &str = "{";

/// Builds the Messages API payload.
///
/// System messages are lifted out of the list, in order, and joined with `\n` into the
/// top-level `system` field. The remaining messages keep their relative order.
pub(crate) fn build_anthropic_query(
    request: &ChatRequest,
    profile: &ProviderProfile,
    caller: &Caller,
) -> ProviderQuery {
    let (system, conversation): (Vec<_>, Vec<_>) = request
        .messages
        .iter()
        .partition(|message| message.role == Role::System);

    let mut messages: Vec<AnthropicMessage<'_>> = conversation
        .into_iter()
        .map(|message| AnthropicMessage {
            role: message.role.as_str(),
            content: &message.content,
        })
        .collect();
    if request.wants_json {
        messages.push(AnthropicMessage {
            role: Role::Assistant.as_str(),
            content: JSON_PRIMER,
        });
    }

    let system = (!system.is_empty()).then(|| {
        system
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    });

    let body = AnthropicMessagesBody {
        model: &profile.model,
        messages,
        system,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        metadata: AnthropicMetadata {
            user_id: caller.user_tag(),
        },
        stop_sequences: STOP_SEQUENCES,
    };

    ProviderQuery {
        family: ProviderFamily::Anthropic,
        body: serde_json::to_value(&body).unwrap_or(Value::Null),
        primed_for_json: request.wants_json,
    }
}
