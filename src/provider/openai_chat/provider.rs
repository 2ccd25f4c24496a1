use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::{DEFAULT_OPENAI_BASE_URL, ProviderFamily};
use crate::error::AiError;
use crate::http::{
    DynHttpTransport, HttpResponse, collect_body_text, join_endpoint, post_json_stream_with_headers,
    post_json_with_headers, retry_after_from_headers,
};
use crate::provider::{ChunkStream, ProviderAdapter, ProviderClient, ProviderQuery, StreamAggregator};
use crate::types::{Caller, ChatRequest, NormalizedResponse, ProviderProfile};

use super::error::{PROVIDER_NAME, parse_openai_error};
use super::request::build_openai_query;
use super::response::normalize_openai;
use super::stream::{OpenAiStreamAggregator, create_chunk_stream};
use super::types::{OpenAiImageBody, OpenAiImageResponse};

/// Model used for image generation.
pub const IMAGE_MODEL: &str = "dall-e-3";

/// Query building and normalization for the Chat Completions schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiChatAdapter;

impl ProviderAdapter for OpenAiChatAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAiCompatible
    }

    fn build_query(
        &self,
        request: &ChatRequest,
        profile: &ProviderProfile,
        caller: &Caller,
    ) -> ProviderQuery {
        build_openai_query(request, profile, caller)
    }

    fn normalize(&self, raw: Value, _query: &ProviderQuery) -> Result<NormalizedResponse, AiError> {
        match raw {
            Value::String(content) => Ok(NormalizedResponse::undefined(content)),
            raw => normalize_openai(raw),
        }
    }

    fn aggregator(
        &self,
        request: &ChatRequest,
        profile: &ProviderProfile,
        _query: &ProviderQuery,
    ) -> Box<dyn StreamAggregator> {
        Box::new(OpenAiStreamAggregator::new(request, profile))
    }
}

/// First image returned by an image generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub url: String,
    pub revised_prompt: Option<String>,
}

/// HTTP client for OpenAI and OpenAI-compatible endpoints such as OpenRouter.
pub struct OpenAiChatClient {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
}

impl OpenAiChatClient {
    /// Creates a client against the public OpenAI endpoint.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Points the client at another compatible base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        join_endpoint(&self.base_url, path)
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ])
    }

    /// Returns the body as JSON, or as a JSON string when it is not JSON.
    fn ensure_success(&self, response: HttpResponse) -> Result<Value, AiError> {
        let status = response.status;
        let retry_after = retry_after_from_headers(&response.headers);
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_openai_error(status, &text, retry_after));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Generates one image with `dall-e-3` and returns the first result.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::EmptyResult`] when the provider answers with no image URL.
    pub async fn generate_image(&self, prompt: &str, size: &str) -> Result<ImageResult, AiError> {
        let body = OpenAiImageBody {
            model: IMAGE_MODEL,
            prompt,
            n: 1,
            size,
        };
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint("images/generations"),
            self.build_headers(),
            &body,
        )
        .await?;
        let raw = self.ensure_success(response)?;
        let parsed: OpenAiImageResponse =
            serde_json::from_value(raw).map_err(|err| AiError::Provider {
                provider: PROVIDER_NAME,
                message: format!("failed to parse image response: {err}"),
                status: None,
            })?;

        parsed
            .data
            .into_iter()
            .next()
            .and_then(|image| {
                image.url.map(|url| ImageResult {
                    url,
                    revised_prompt: image.revised_prompt,
                })
            })
            .ok_or_else(|| AiError::EmptyResult {
                message: "image generation returned no results".to_string(),
            })
    }
}

#[async_trait]
impl ProviderClient for OpenAiChatClient {
    async fn send(&self, query: &ProviderQuery) -> Result<Value, AiError> {
        let url = self.endpoint("chat/completions");
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
        let url = self.endpoint("chat/completions");
        debug!(provider = PROVIDER_NAME, %url, "sending streamed chat request");

        let mut headers = self.build_headers();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        let response =
            post_json_stream_with_headers(self.transport.as_ref(), url, headers, &body).await?;

        if !response.is_success() {
            let status = response.status;
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_body_text(response.body, PROVIDER_NAME).await?;
            return Err(parse_openai_error(status, &text, retry_after));
        }

        Ok(create_chunk_stream(response.body))
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
