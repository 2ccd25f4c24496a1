//! One chat interface over OpenAI, OpenRouter and Anthropic.
//!
//! The [`Gateway`] builds a provider-specific query, sends it either as a single
//! request or as a stream, folds the result into a [`NormalizedResponse`], and writes
//! one [`UsageRecord`] per call.

pub mod callback;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod pricing;
pub mod provider;
pub mod stream;
pub mod tokens;
pub mod types;
pub mod usage;

pub use callback::{CallbackError, ChunkCallback};
pub use config::{CredentialSource, GatewayConfig, ProviderCredentials, ProviderFamily, ProviderKind};
pub use error::{AiError, AiStatus};
pub use gateway::{Gateway, GatewayBuilder, ModelPreset};
pub use provider::Chunk;
pub use provider::openai_chat::ImageResult;
pub use types::*;
pub use usage::{MemoryUsageSink, TracingUsageSink, UsageRecord, UsageSink};
