//! Chat orchestration: provider selection, dispatch, outcome classification and usage
//! logging.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::callback::ChunkCallback;
use crate::config::{CredentialSource, GatewayConfig, ProviderFamily, ProviderKind};
use crate::error::AiError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::openai_chat::{IMAGE_MODEL, ImageResult, OpenAiChatClient};
use crate::provider::{
    DynProviderClient, ProviderAdapter, ProviderQuery, StreamFold, adapter_for, client_for,
};
use crate::tokens;
use crate::types::{Caller, ChatRequest, NormalizedResponse, ProviderProfile, Usage};
use crate::usage::{IMAGE_REQUEST_TYPE, TracingUsageSink, UsageRecord, UsageSink};

/// Image size used when the caller does not pick one.
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

/// Named provider/model pairs the gateway can switch between.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPreset {
    #[default]
    Gpt4o,
    Gpt4oMini,
    ClaudeHaiku,
    ClaudeSonnet,
    ClaudeOpus,
}

impl ModelPreset {
    /// Cheapest preset.
    pub const FAST: Self = Self::Gpt4oMini;
    pub const BALANCED: Self = Self::ClaudeSonnet;
    pub const HIGH_CAPABILITY: Self = Self::Gpt4o;

    pub fn profile(&self) -> ProviderProfile {
        match self {
            Self::Gpt4o => ProviderProfile::new(ProviderKind::OpenAi, "gpt-4o-2024-08-06"),
            Self::Gpt4oMini => ProviderProfile::new(ProviderKind::OpenAi, "gpt-4o-mini"),
            Self::ClaudeHaiku => {
                ProviderProfile::new(ProviderKind::Anthropic, "claude-3-haiku-20240307")
            }
            // Opus shares the 3.5 Sonnet model.
            Self::ClaudeSonnet | Self::ClaudeOpus => {
                ProviderProfile::new(ProviderKind::Anthropic, "claude-3-5-sonnet-20240620")
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4o => "gpt4o",
            Self::Gpt4oMini => "gpt4o_mini",
            Self::ClaudeHaiku => "claude_haiku",
            Self::ClaudeSonnet => "claude_sonnet",
            Self::ClaudeOpus => "claude_opus",
        }
    }
}

impl fmt::Display for ModelPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelPreset {
    type Err = AiError;

    /// Accepts preset names and the tier aliases `fast`, `cheap`, `balanced` and
    /// `high-capability`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "gpt4o" => Ok(Self::Gpt4o),
            "gpt4o_mini" => Ok(Self::Gpt4oMini),
            "claude_haiku" => Ok(Self::ClaudeHaiku),
            "claude_sonnet" => Ok(Self::ClaudeSonnet),
            "claude_opus" => Ok(Self::ClaudeOpus),
            "fast" | "cheap" => Ok(Self::FAST),
            "balanced" => Ok(Self::BALANCED),
            "high_capability" => Ok(Self::HIGH_CAPABILITY),
            other => Err(AiError::InvalidConfig {
                field: "preset".to_string(),
                reason: format!("unknown model preset: {other}"),
            }),
        }
    }
}

/// Provider, adapter and client that are swapped together.
struct Selection {
    profile: ProviderProfile,
    adapter: Arc<dyn ProviderAdapter>,
    client: DynProviderClient,
}

/// Single entry point for chat and image calls.
///
/// A gateway owns one provider selection at a time. Switching goes through `&mut self`
/// and either fully applies or leaves the previous selection in place, so callers
/// that share a gateway behind `&` never observe a half-switched state.
///
/// # Examples
///
/// ```no_run
/// use modelgate::{ChatRequest, Gateway, GatewayConfig, Message, ModelPreset};
///
/// # async fn run() -> Result<(), modelgate::AiError> {
/// let gateway = Gateway::builder(GatewayConfig::from_env())
///     .preset(ModelPreset::FAST)
///     .build()?;
/// let request = ChatRequest::new(vec![Message::user("Say hello")]);
/// let response = gateway.chat("Greeting", request, None).await?;
/// println!("{}", response.content);
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    config: GatewayConfig,
    credentials: Arc<dyn CredentialSource>,
    transport: DynHttpTransport,
    sink: Arc<dyn UsageSink>,
    caller: Caller,
    selection: Selection,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            credentials: None,
            transport: None,
            sink: None,
            caller: Caller::default(),
            preset: ModelPreset::default(),
        }
    }

    /// Provider kind and model currently targeted.
    pub fn profile(&self) -> &ProviderProfile {
        &self.selection.profile
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn set_caller(&mut self, caller: Caller) {
        self.caller = caller;
    }

    /// Switches to a named preset.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::InvalidConfig`] when the preset's provider has no usable
    /// credentials; the current selection is kept.
    pub fn use_preset(&mut self, preset: ModelPreset) -> Result<(), AiError> {
        let profile = preset.profile();
        self.switch_to(profile.kind, profile.model)
    }

    /// Switches to an explicit provider kind and model.
    pub fn switch_to(&mut self, kind: ProviderKind, model: impl Into<String>) -> Result<(), AiError> {
        let profile = ProviderProfile::new(kind, model);
        let selection = select(
            profile,
            self.credentials.as_ref(),
            &self.transport,
            &self.config,
        )?;
        info!(
            provider = selection.profile.kind.as_str(),
            model = %selection.profile.model,
            "switched ai provider"
        );
        self.selection = selection;
        Ok(())
    }

    /// Runs one chat request against the current selection.
    ///
    /// With a callback the request is streamed: each chunk reaches the callback, in
    /// order, before it is folded. Without one a single response is normalized.
    ///
    /// Exactly one [`UsageRecord`] is written per call, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Transport and provider failures are returned as reported. A response whose
    /// finish reason is not `stop`, `end_turn` or `stop_sequence` becomes
    /// [`AiError::Semantic`] with the message `AI API error: <reason>`.
    pub async fn chat(
        &self,
        request_type: &str,
        request: ChatRequest,
        callback: Option<&mut ChunkCallback>,
    ) -> Result<NormalizedResponse, AiError> {
        let started = Instant::now();
        let selection = &self.selection;
        let query = selection
            .adapter
            .build_query(&request, &selection.profile, &self.caller);
        let streamed = callback.is_some();
        debug!(
            provider = selection.profile.kind.as_str(),
            model = %selection.profile.model,
            request_type,
            streamed,
            "dispatching chat request"
        );

        let outcome = match callback {
            Some(callback) => self.run_streamed(&request, &query, callback).await,
            None => self.run_single(&query).await,
        };
        let latency_ms = elapsed_ms(started);
        let request_payload = serde_json::to_string(&request.messages).unwrap_or_default();
        let record = |success: bool, response_payload: String, usage: Option<Usage>| UsageRecord {
            user_id: self.caller.user_id,
            team_id: self.caller.team_id,
            ip: self.caller.ip.clone(),
            provider: selection.profile.kind,
            model: selection.profile.model.clone(),
            request_type: request_type.to_string(),
            request_payload: request_payload.clone(),
            response_payload,
            success,
            usage,
            latency_ms,
        };

        match outcome {
            Ok(response) if response.is_success() => {
                debug!(
                    finish_reason = %response.finish_reason,
                    total_tokens = response.usage.total_tokens,
                    latency_ms,
                    "chat request succeeded"
                );
                self.emit(record(true, response.content.clone(), Some(response.usage)))
                    .await;
                Ok(response)
            }
            Ok(response) => {
                warn!(
                    finish_reason = %response.finish_reason,
                    latency_ms,
                    "chat request finished with unaccepted reason"
                );
                let payload = match &response.raw {
                    Value::Null => response.content.clone(),
                    Value::String(text) => text.clone(),
                    raw => raw.to_string(),
                };
                self.emit(record(false, payload, Some(response.usage))).await;
                Err(AiError::Semantic {
                    message: format!("AI API error: {}", response.finish_reason),
                    finish_reason: response.finish_reason,
                })
            }
            Err(err) => {
                warn!(error = %err, latency_ms, "chat request failed");
                self.emit(record(false, error_payload(&err), None)).await;
                Err(err)
            }
        }
    }

    /// Generates one image with the OpenAI credentials.
    ///
    /// The current chat selection is neither used nor changed. `size` defaults to
    /// [`DEFAULT_IMAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`AiError::EmptyResult`] when the provider returns no image.
    pub async fn generate_image(
        &self,
        prompt: &str,
        size: Option<&str>,
    ) -> Result<ImageResult, AiError> {
        let started = Instant::now();
        let size = size.unwrap_or(DEFAULT_IMAGE_SIZE);
        debug!(model = IMAGE_MODEL, size, "dispatching image request");

        let outcome = match self.credentials.credentials(ProviderKind::OpenAi) {
            Ok(credentials) => {
                let mut client = OpenAiChatClient::new(self.transport.clone(), credentials.api_key);
                if let Some(base_url) = credentials.base_url {
                    client = client.with_base_url(base_url);
                }
                client.generate_image(prompt, size).await
            }
            Err(err) => Err(err),
        };

        let (success, response_payload) = match &outcome {
            Ok(image) => (true, image.url.clone()),
            Err(err) => {
                warn!(error = %err, "image request failed");
                (false, error_payload(err))
            }
        };
        self.emit(UsageRecord {
            user_id: self.caller.user_id,
            team_id: self.caller.team_id,
            ip: self.caller.ip.clone(),
            provider: ProviderKind::OpenAi,
            model: IMAGE_MODEL.to_string(),
            request_type: IMAGE_REQUEST_TYPE.to_string(),
            request_payload: prompt.to_string(),
            response_payload,
            success,
            usage: None,
            latency_ms: elapsed_ms(started),
        })
        .await;

        outcome
    }

    async fn run_single(&self, query: &ProviderQuery) -> Result<NormalizedResponse, AiError> {
        let raw = self.selection.client.send(query).await?;
        self.selection.adapter.normalize(raw, query)
    }

    async fn run_streamed(
        &self,
        request: &ChatRequest,
        query: &ProviderQuery,
        callback: &mut ChunkCallback,
    ) -> Result<NormalizedResponse, AiError> {
        let selection = &self.selection;
        let mut chunks = selection.client.send_streamed(query).await?;
        let aggregator = selection
            .adapter
            .aggregator(request, &selection.profile, query);
        let mut fold = StreamFold::new(aggregator, Some(callback));
        while let Some(chunk) = chunks.next().await {
            fold.feed(&chunk?);
        }
        debug!(chunks = fold.chunks(), "stream exhausted");
        Ok(fold.finish())
    }

    async fn emit(&self, record: UsageRecord) {
        if let Err(err) = self.sink.record(record).await {
            warn!(error = %err, "failed to write usage record");
        }
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("profile", &self.selection.profile)
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

/// Configures and builds a [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    credentials: Option<Arc<dyn CredentialSource>>,
    transport: Option<DynHttpTransport>,
    sink: Option<Arc<dyn UsageSink>>,
    caller: Caller,
    preset: ModelPreset,
}

impl GatewayBuilder {
    /// Resolves credentials through `source` instead of the config's own entries.
    pub fn credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    pub fn transport(mut self, transport: DynHttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Destination of usage records; defaults to [`TracingUsageSink`].
    pub fn sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn caller(mut self, caller: Caller) -> Self {
        self.caller = caller;
        self
    }

    /// Initial selection; defaults to [`ModelPreset::Gpt4o`].
    pub fn preset(mut self, preset: ModelPreset) -> Self {
        self.preset = preset;
        self
    }

    /// # Errors
    ///
    /// Fails when the initial preset has no credentials or the default HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Gateway, AiError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_dyn_transport()?,
        };
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(self.config.clone()));
        let selection = select(
            self.preset.profile(),
            credentials.as_ref(),
            &transport,
            &self.config,
        )?;
        Ok(Gateway {
            config: self.config,
            credentials,
            transport,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingUsageSink)),
            caller: self.caller,
            selection,
        })
    }
}

fn select(
    profile: ProviderProfile,
    credentials: &dyn CredentialSource,
    transport: &DynHttpTransport,
    config: &GatewayConfig,
) -> Result<Selection, AiError> {
    let resolved = credentials.credentials(profile.kind)?;
    if profile.family() == ProviderFamily::OpenAiCompatible {
        tokens::warm(profile.kind, &profile.model);
    }
    Ok(Selection {
        adapter: adapter_for(profile.family()),
        client: client_for(profile.kind, resolved, transport.clone(), config),
        profile,
    })
}

fn error_payload(err: &AiError) -> String {
    format!("{}: {}", err.status(), err.message())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
