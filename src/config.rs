use std::env;

use serde::{Deserialize, Serialize};

use crate::error::AiError;

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI Chat Completions.
    OpenAi,
    /// OpenRouter, which speaks the OpenAI Chat Completions schema.
    OpenRouter,
    /// Anthropic Messages.
    Anthropic,
}

impl ProviderKind {
    /// Schema family shared with other kinds.
    pub fn family(&self) -> ProviderFamily {
        match self {
            ProviderKind::OpenAi | ProviderKind::OpenRouter => ProviderFamily::OpenAiCompatible,
            ProviderKind::Anthropic => ProviderFamily::Anthropic,
        }
    }

    /// Name used in usage records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::OpenRouter => "OpenRouter",
            ProviderKind::Anthropic => "Anthropic",
        }
    }
}

/// Request/response schema convention shared by a group of providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    OpenAiCompatible,
    Anthropic,
}

/// 鉴权信息 一个供应商的 API Key 与地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: String,
    /// Base URL, with or without a trailing `/v1`. Providers fall back to their public
    /// endpoint when unset.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Resolves credentials for a provider kind.
///
/// The gateway asks on every provider switch and every image call; implementations
/// may rotate keys between calls.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self, kind: ProviderKind) -> Result<ProviderCredentials, AiError>;
}

/// Explicit gateway configuration.
///
/// # Examples
///
/// ```
/// use modelgate::config::{CredentialSource, GatewayConfig, ProviderKind};
///
/// let config: GatewayConfig = serde_json::from_value(serde_json::json!({
///     "openai": { "api_key": "sk-test" },
///     "anthropic": { "api_key": "sk-ant", "base_url": "https://proxy.local" }
/// }))
/// .unwrap();
///
/// assert_eq!(config.credentials(ProviderKind::OpenAi).unwrap().api_key, "sk-test");
/// assert!(config.credentials(ProviderKind::OpenRouter).is_err());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub openai: Option<ProviderCredentials>,
    #[serde(default)]
    pub openrouter: Option<ProviderCredentials>,
    #[serde(default)]
    pub anthropic: Option<ProviderCredentials>,
    /// Overrides the `anthropic-version` header.
    #[serde(default)]
    pub anthropic_version: Option<String>,
    /// Value for the `anthropic-beta` header, comma separated.
    #[serde(default)]
    pub anthropic_beta: Option<String>,
}

/// OpenAI endpoint used when `OPENAI_BASE_URI` is unset.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenRouter endpoint used when no base URL is configured.
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

impl GatewayConfig {
    /// Reads credentials from the process environment.
    ///
    /// Recognized variables: `OPENAI_API_KEY`, `OPENAI_BASE_URI`, `OPENROUTER_API_KEY`,
    /// `OPENROUTER_BASE_URI`, `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URI`,
    /// `ANTHROPIC_VERSION`, `ANTHROPIC_BETA`. Empty values count as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let credentials = |key_var: &str, base_var: &str, default_base: Option<&str>| {
            get(key_var).map(|api_key| ProviderCredentials {
                api_key,
                base_url: get(base_var).or_else(|| default_base.map(str::to_string)),
            })
        };

        Self {
            openai: credentials(
                "OPENAI_API_KEY",
                "OPENAI_BASE_URI",
                Some(DEFAULT_OPENAI_BASE_URL),
            ),
            openrouter: credentials("OPENROUTER_API_KEY", "OPENROUTER_BASE_URI", None),
            anthropic: credentials("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URI", None),
            anthropic_version: get("ANTHROPIC_VERSION"),
            anthropic_beta: get("ANTHROPIC_BETA"),
        }
    }

    pub fn with_openai(mut self, credentials: ProviderCredentials) -> Self {
        self.openai = Some(credentials);
        self
    }

    pub fn with_openrouter(mut self, credentials: ProviderCredentials) -> Self {
        self.openrouter = Some(credentials);
        self
    }

    pub fn with_anthropic(mut self, credentials: ProviderCredentials) -> Self {
        self.anthropic = Some(credentials);
        self
    }
}

impl CredentialSource for GatewayConfig {
    fn credentials(&self, kind: ProviderKind) -> Result<ProviderCredentials, AiError> {
        let entry = match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::OpenRouter => &self.openrouter,
            ProviderKind::Anthropic => &self.anthropic,
        };
        let credentials = entry.clone().ok_or_else(|| AiError::InvalidConfig {
            field: kind.as_str().to_ascii_lowercase(),
            reason: format!("no credentials configured for provider {}", kind.as_str()),
        })?;
        if credentials.api_key.trim().is_empty() {
            return Err(AiError::InvalidConfig {
                field: format!("{}.api_key", kind.as_str().to_ascii_lowercase()),
                reason: "api key must not be empty".to_string(),
            });
        }
        Ok(credentials)
    }
}
