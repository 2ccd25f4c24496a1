use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::ProviderFamily;
use crate::error::AiError;
use crate::http::{
    DynHttpTransport, HttpResponse, collect_body_text, join_endpoint, post_json_stream_with_headers,
    post_json_with_headers, retry_after_from_headers,
};
use crate::provider::{ChunkStream, ProviderAdapter, ProviderClient, ProviderQuery, StreamAggregator};
use crate::types::{Caller, ChatRequest, NormalizedResponse, ProviderProfile};

use super::error::{PROVIDER_NAME, parse_anthropic_error};
use super::request::build_anthropic_query;
use super::response::normalize_anthropic;
use super::stream::{AnthropicStreamAggregator, create_chunk_stream};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";

/// Query building and normalization for the Messages schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicMessagesAdapter;

impl ProviderAdapter for AnthropicMessagesAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn build_query(
        &self,
        request: &ChatRequest,
        profile: &ProviderProfile,
        caller: &Caller,
    ) -> ProviderQuery {
        build_anthropic_query(request, profile, caller)
    }

    fn normalize(&self, raw: Value, query: &ProviderQuery) -> Result<NormalizedResponse, AiError> {
        match raw {
            Value::String(content) => Ok(NormalizedResponse::undefined(content)),
            raw => normalize_anthropic(raw, query.primed_for_json),
        }
    }

    fn aggregator(
        &self,
        _request: &ChatRequest,
        _profile: &ProviderProfile,
        query: &ProviderQuery,
    ) -> Box<dyn StreamAggregator> {
        Box::new(AnthropicStreamAggregator::new(query.primed_for_json))
    }
}

/// HTTP client for the Anthropic Messages API.
pub struct AnthropicMessagesClient {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    version: String,
    beta: Option<String>,
}

impl AnthropicMessagesClient {
    /// Uses the public endpoint and `anthropic-version: 2023-06-01`.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_VERSION.to_string(),
            beta: None,
        }
    }

    /// Custom base URL, for proxies or compatible gateways.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the `anthropic-beta` header; accepts a comma separated list.
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        join_endpoint(&self.base_url, "messages")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        headers.insert("Accept".to_string(), "application/json".to_string());
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        headers
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<Value, AiError> {
        let status = response.status;
        let retry_after = retry_after_from_headers(&response.headers);
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_anthropic_error(status, &text, retry_after));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl ProviderClient for AnthropicMessagesClient {
    async fn send(&self, query: &ProviderQuery) -> Result<Value, AiError> {
        let url = self.endpoint();
        debug!(provider = PROVIDER_NAME, %url, "sending chat request");
        let response =
            post_json_with_headers(self.transport.as_ref(), url, self.build_headers(), &query.body)
                .await?;
        self.ensure_success(response)
    }

    async fn send_streamed(&self, query: &ProviderQuery) -> Result<ChunkStream, AiError> {
        let mut body = query.body.clone();
        if let Value::Object(map) = &mut body {
            map.insert("stream".to_string(), Value::Bool(true));
        }
        let url = self.endpoint();
        debug!(provider = PROVIDER_NAME, %url, "sending streamed chat request");

        let mut headers = self.build_headers();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        let response =
            post_json_stream_with_headers(self.transport.as_ref(), url, headers, &body).await?;

        if !response.is_success() {
            let status = response.status;
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_body_text(response.body, PROVIDER_NAME).await?;
            return Err(parse_anthropic_error(status, &text, retry_after));
        }

        Ok(create_chunk_stream(response.body))
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
