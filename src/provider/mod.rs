//! Provider-family adapters and the transport interface they are driven through.
//!
//! A [`ProviderAdapter`] holds everything schema-specific about a family: how a
//! [`ChatRequest`] becomes a [`ProviderQuery`], how a non-streamed body becomes a
//! [`NormalizedResponse`], and how a chunk sequence folds into the same shape. The
//! [`ProviderClient`] moves queries over the wire and hands back raw bodies or chunks.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::ChunkCallback;
use crate::config::{
    DEFAULT_OPENROUTER_BASE_URL, GatewayConfig, ProviderCredentials, ProviderFamily, ProviderKind,
};
use crate::error::AiError;
use crate::http::DynHttpTransport;
use crate::types::{Caller, ChatRequest, NormalizedResponse, ProviderProfile};

pub mod anthropic_messages;
pub mod openai_chat;

use anthropic_messages::{AnthropicMessagesAdapter, AnthropicMessagesClient};
use openai_chat::{OpenAiChatAdapter, OpenAiChatClient};

/// Provider-specific wire payload, built fresh for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuery {
    pub family: ProviderFamily,
    /// JSON body sent to the provider, without the `stream` flag.
    pub body: Value,
    /// Set when the builder appended a partial assistant message to bias the reply
    /// toward JSON; the normalizer uses it to repair the missing opening brace.
    pub primed_for_json: bool,
}

/// One increment of a streamed response, in its provider's own shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub family: ProviderFamily,
    pub payload: Value,
}

impl Chunk {
    pub fn new(family: ProviderFamily, payload: Value) -> Self {
        Self { family, payload }
    }

    /// Display text carried by this chunk, if any.
    ///
    /// OpenAI-family chunks yield assistant delta content; Anthropic chunks yield the
    /// text of `content_block_delta` events.
    ///
    /// # Examples
    ///
    /// ```
    /// use modelgate::config::ProviderFamily;
    /// use modelgate::provider::Chunk;
    /// use serde_json::json;
    ///
    /// let chunk = Chunk::new(
    ///     ProviderFamily::Anthropic,
    ///     json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}),
    /// );
    /// assert_eq!(chunk.text(), Some("Hi"));
    /// ```
    pub fn text(&self) -> Option<&str> {
        match self.family {
            ProviderFamily::OpenAiCompatible => openai_chat::chunk_text(&self.payload),
            ProviderFamily::Anthropic => anthropic_messages::chunk_text(&self.payload),
        }
    }
}

/// 流式响应别名
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, AiError>> + Send>>;

/// Folds a chunk sequence into a [`NormalizedResponse`].
///
/// Aggregators perform no I/O; the result depends only on the chunks pushed and the
/// request the aggregator was created for.
pub trait StreamAggregator: Send {
    /// Folds one chunk, in delivery order.
    fn push(&mut self, chunk: &Chunk);

    /// Produces the normalized result once the sequence is exhausted.
    fn finish(self: Box<Self>) -> NormalizedResponse;
}

/// Schema-specific behavior of one provider family.
pub trait ProviderAdapter: Send + Sync {
    fn family(&self) -> ProviderFamily;

    /// Converts a provider-agnostic request into the family's wire payload.
    fn build_query(
        &self,
        request: &ChatRequest,
        profile: &ProviderProfile,
        caller: &Caller,
    ) -> ProviderQuery;

    /// Normalizes a non-streamed response body.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Provider`] when the body is structured but not shaped like a
    /// response of this family.
    fn normalize(&self, raw: Value, query: &ProviderQuery) -> Result<NormalizedResponse, AiError>;

    /// Starts a fold for the streamed response to `query`.
    fn aggregator(
        &self,
        request: &ChatRequest,
        profile: &ProviderProfile,
        query: &ProviderQuery,
    ) -> Box<dyn StreamAggregator>;
}

/// Returns the adapter for a provider family.
pub fn adapter_for(family: ProviderFamily) -> Arc<dyn ProviderAdapter> {
    match family {
        ProviderFamily::OpenAiCompatible => Arc::new(OpenAiChatAdapter),
        ProviderFamily::Anthropic => Arc::new(AnthropicMessagesAdapter),
    }
}

/// 统一的 Provider Client Trait 负责把查询发送到上游
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// 提交完整请求并等待完整响应
    ///
    /// 成功响应的 body 不是 JSON 时 以 JSON 字符串返回
    async fn send(&self, query: &ProviderQuery) -> Result<Value, AiError>;

    /// 以流式方式返回增量事件
    async fn send_streamed(&self, query: &ProviderQuery) -> Result<ChunkStream, AiError>;

    /// 供应商名称
    fn name(&self) -> &'static str;
}

/// 线程安全 Provider
pub type DynProviderClient = Arc<dyn ProviderClient>;

/// Builds the client for a provider kind from freshly resolved credentials.
pub fn client_for(
    kind: ProviderKind,
    credentials: ProviderCredentials,
    transport: DynHttpTransport,
    config: &GatewayConfig,
) -> DynProviderClient {
    match kind.family() {
        ProviderFamily::OpenAiCompatible => {
            let mut client = OpenAiChatClient::new(transport, credentials.api_key);
            let base_url = match (kind, credentials.base_url) {
                (_, Some(base_url)) => Some(base_url),
                (ProviderKind::OpenRouter, None) => Some(DEFAULT_OPENROUTER_BASE_URL.to_string()),
                _ => None,
            };
            if let Some(base_url) = base_url {
                client = client.with_base_url(base_url);
            }
            Arc::new(client)
        }
        ProviderFamily::Anthropic => {
            let mut client = AnthropicMessagesClient::new(transport, credentials.api_key);
            if let Some(base_url) = credentials.base_url {
                client = client.with_base_url(base_url);
            }
            if let Some(version) = &config.anthropic_version {
                client = client.with_version(version.clone());
            }
            if let Some(beta) = &config.anthropic_beta {
                client = client.with_beta(beta.clone());
            }
            Arc::new(client)
        }
    }
}

/// Pairs an aggregator with the caller's callback.
///
/// Each chunk goes to the callback first and is folded afterwards; callback failures
/// never reach the aggregator.
pub struct StreamFold<'a> {
    aggregator: Box<dyn StreamAggregator>,
    callback: Option<&'a mut ChunkCallback>,
    chunks: usize,
}

impl<'a> StreamFold<'a> {
    pub fn new(aggregator: Box<dyn StreamAggregator>, callback: Option<&'a mut ChunkCallback>) -> Self {
        Self {
            aggregator,
            callback,
            chunks: 0,
        }
    }

    pub fn feed(&mut self, chunk: &Chunk) {
        if let Some(callback) = self.callback.as_deref_mut() {
            callback.deliver(chunk);
        }
        self.aggregator.push(chunk);
        self.chunks += 1;
    }

    /// Number of chunks folded so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn finish(self) -> NormalizedResponse {
        self.aggregator.finish()
    }
}

/// Folds an in-memory chunk sequence, invoking `callback` for each chunk.
///
/// # Examples
///
/// ```
/// use modelgate::config::{ProviderFamily, ProviderKind};
/// use modelgate::provider::{adapter_for, aggregate_chunks, Chunk};
/// use modelgate::types::{Caller, ChatRequest, Message, ProviderProfile};
/// use serde_json::json;
///
/// let profile = ProviderProfile::new(ProviderKind::Anthropic, "claude-3-haiku-20240307");
/// let request = ChatRequest::new(vec![Message::user("Hi")]);
/// let adapter = adapter_for(ProviderFamily::Anthropic);
/// let query = adapter.build_query(&request, &profile, &Caller::default());
///
/// let chunks = vec![
///     Chunk::new(ProviderFamily::Anthropic, json!({"type": "message_start", "message": {"usage": {"input_tokens": 9}}})),
///     Chunk::new(ProviderFamily::Anthropic, json!({"type": "content_block_delta", "delta": {"text": "Hello"}})),
///     Chunk::new(ProviderFamily::Anthropic, json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}})),
/// ];
/// let response = aggregate_chunks(adapter.aggregator(&request, &profile, &query), chunks, None);
/// assert_eq!(response.content, "Hello");
/// assert_eq!(response.usage.total_tokens, 11);
/// ```
pub fn aggregate_chunks<I>(
    aggregator: Box<dyn StreamAggregator>,
    chunks: I,
    callback: Option<&mut ChunkCallback>,
) -> NormalizedResponse
where
    I: IntoIterator<Item = Chunk>,
{
    let mut fold = StreamFold::new(aggregator, callback);
    for chunk in chunks {
        fold.feed(&chunk);
    }
    fold.finish()
}
