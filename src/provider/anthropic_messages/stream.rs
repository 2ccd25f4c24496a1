use futures_util::StreamExt;
use serde_json::Value;

use crate::config::ProviderFamily;
use crate::error::AiError;
use crate::http::HttpBodyStream;
use crate::provider::{Chunk, ChunkStream, StreamAggregator};
use crate::stream::{StreamDecoder, StreamEvent};
use crate::types::{NormalizedResponse, Usage};

use super::error::{PROVIDER_NAME, stream_error};
use super::response::repair_primed_json;
use super::types::AnthropicStreamEvent;

/// Stop reason that marks a completed Anthropic stream.
const TERMINAL_STOP_REASON: &str = "end_turn";

/// Turns an SSE body into Anthropic chunks, one per event payload.
pub(crate) fn create_chunk_stream(body: HttpBodyStream) -> ChunkStream {
    let decoder = StreamDecoder::new(body, PROVIDER_NAME);
    let chunks = decoder.filter_map(|event| {
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
        message: format!("failed to parse stream event: {err}"),
        status: None,
    })?;
    if let Some(err) = stream_error(&payload) {
        return Err(err);
    }
    Ok(Chunk::new(ProviderFamily::Anthropic, payload))
}

/// Text carried by a `content_block_delta` event.
pub(crate) fn chunk_text(payload: &Value) -> Option<&str> {
    if payload.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }
    payload.get("delta")?.get("text")?.as_str()
}

/// Folds Anthropic events. Token counts come only from the provider.
pub(crate) struct AnthropicStreamAggregator {
    content: String,
    input_tokens: u64,
    output_tokens: u64,
    primed_for_json: bool,
}

impl AnthropicStreamAggregator {
    pub(crate) fn new(primed_for_json: bool) -> Self {
        Self {
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            primed_for_json,
        }
    }
}

impl StreamAggregator for AnthropicStreamAggregator {
    fn push(&mut self, chunk: &Chunk) {
        let Ok(event) = serde_json::from_value::<AnthropicStreamEvent>(chunk.payload.clone()) else {
            return;
        };
        match event {
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                if let Some(text) = delta.text {
                    self.content.push_str(&text);
                }
            }
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(input) = message.usage.and_then(|usage| usage.input_tokens) {
                    self.input_tokens = input;
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.as_deref() == Some(TERMINAL_STOP_REASON) {
                    if let Some(output) = usage.and_then(|usage| usage.output_tokens) {
                        self.output_tokens = output;
                    }
                }
            }
            AnthropicStreamEvent::Other => {}
        }
    }

    fn finish(self: Box<Self>) -> NormalizedResponse {
        let content = if self.primed_for_json {
            repair_primed_json(self.content)
        } else {
            self.content
        };
        NormalizedResponse {
            content,
            finish_reason: TERMINAL_STOP_REASON.to_string(),
            usage: Usage::new(self.input_tokens, self.output_tokens),
            streamed: true,
            raw: Value::Null,
        }
    }
}
