use serde_json::Value;

use crate::config::ProviderFamily;
use crate::provider::ProviderQuery;
use crate::types::{Caller, ChatRequest, ProviderProfile};

use super::types::{OpenAiChatBody, OpenAiMessage, OpenAiResponseFormat};

/// Builds the Chat Completions payload.
///
/// Messages go out verbatim and in order. JSON mode is requested through
/// `response_format`, never by priming the reply.
pub(crate) fn build_openai_query(
    request: &ChatRequest,
    profile: &ProviderProfile,
    caller: &Caller,
) -> ProviderQuery {
    let body = OpenAiChatBody {
        model: &profile.model,
        messages: request
            .messages
            .iter()
            .map(|message| OpenAiMessage {
                role: message.role.as_str(),
                content: &message.content,
            })
            .collect(),
        temperature: request.temperature,
        user: caller.user_tag(),
        max_tokens: request.max_tokens,
        response_format: request.wants_json.then_some(OpenAiResponseFormat {
            kind: "json_object",
        }),
    };

    ProviderQuery {
        family: ProviderFamily::OpenAiCompatible,
        body: serde_json::to_value(&body).unwrap_or(Value::Null),
        primed_for_json: false,
    }
}
