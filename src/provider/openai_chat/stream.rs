use futures_util::StreamExt;
use serde_json::Value;

use crate::config::ProviderFamily;
use crate::error::AiError;
use crate::http::HttpBodyStream;
use crate::provider::{Chunk, ChunkStream, StreamAggregator};
use crate::stream::{StreamDecoder, StreamEvent};
use crate::tokens::PromptTokenCounter;
use crate::types::{ChatRequest, NormalizedResponse, ProviderProfile, Usage};

use super::error::{PROVIDER_NAME, stream_error};
use super::types::OpenAiStreamChunk;

/// Finish reason reported for every completed OpenAI-family stream.
const STREAM_FINISH_REASON: &str = "stop";

/// Turns an SSE body into OpenAI-family chunks. `[DONE]` ends the sequence.
pub(crate) fn create_chunk_stream(body: HttpBodyStream) -> ChunkStream {
    let decoder = StreamDecoder::new(body, PROVIDER_NAME);
    let chunks = decoder
        .take_while(|event| futures_util::future::ready(!matches!(event, Ok(StreamEvent::Done))))
        .filter_map(|event| {
            futures_util::future::ready(match event {
                Ok(StreamEvent::Data(data)) => Some(parse_chunk(&data)),
                Ok(StreamEvent::Done) => None,
                Err(err) => Some(Err(err)),
            })
        });
    Box::pin(chunks)
}

fn parse_chunk(data: &str) -> Result<Chunk, AiError> {
    let payload: Value = serde_json::from_str(data).map_err(|err| AiError::Provider {
        provider: PROVIDER_NAME,
        message: format!("failed to parse stream chunk: {err}"),
        status: None,
    })?;
    if let Some(err) = stream_error(&payload) {
        return Err(err);
    }
    Ok(Chunk::new(ProviderFamily::OpenAiCompatible, payload))
}

/// Delta text of the first choice, when the delta belongs to the assistant.
pub(crate) fn chunk_text(payload: &Value) -> Option<&str> {
    let delta = payload.get("choices")?.get(0)?.get("delta")?;
    match delta.get("role").and_then(Value::as_str) {
        None | Some("assistant") => delta.get("content").and_then(Value::as_str),
        Some(_) => None,
    }
}

/// Folds OpenAI-family chunks.
///
/// These streams carry no usage, so prompt tokens are counted locally over the
/// request's message contents and every chunk counts as one completion token.
pub(crate) struct OpenAiStreamAggregator {
    content: String,
    chunks: u64,
    prompt_tokens: u64,
}

impl OpenAiStreamAggregator {
    pub(crate) fn new(request: &ChatRequest, profile: &ProviderProfile) -> Self {
        let counter = PromptTokenCounter::for_model(profile.kind, &profile.model);
        Self {
            content: String::new(),
            chunks: 0,
            prompt_tokens: counter.count(&request.joined_contents()),
        }
    }
}

impl StreamAggregator for OpenAiStreamAggregator {
    fn push(&mut self, chunk: &Chunk) {
        self.chunks += 1;
        if let Ok(parsed) = serde_json::from_value::<OpenAiStreamChunk>(chunk.payload.clone()) {
            let delta = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta);
            if let Some(delta) = delta {
                let from_assistant = delta.role.as_deref().is_none_or(|role| role == "assistant");
                if from_assistant {
                    if let Some(content) = delta.content {
                        self.content.push_str(&content);
                    }
                }
            }
        }
    }

    fn finish(self: Box<Self>) -> NormalizedResponse {
        NormalizedResponse {
            content: self.content,
            finish_reason: STREAM_FINISH_REASON.to_string(),
            usage: Usage::new(self.prompt_tokens, self.chunks),
            streamed: true,
            raw: Value::Null,
        }
    }
}
