//! Static per-token prices in USD.
//!
//! Rates are stored per single token; list prices quoted per thousand or per million
//! tokens are divided down once, here.

use serde::{Deserialize, Serialize};

use crate::config::ProviderKind;

/// Prompt and completion price of one token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub prompt_per_token: f64,
    pub completion_per_token: f64,
}

impl ModelRate {
    const fn per_thousand(prompt: f64, completion: f64) -> Self {
        Self {
            prompt_per_token: prompt / 1_000.0,
            completion_per_token: completion / 1_000.0,
        }
    }

    const fn per_million(prompt: f64, completion: f64) -> Self {
        Self {
            prompt_per_token: prompt / 1_000_000.0,
            completion_per_token: completion / 1_000_000.0,
        }
    }

    /// Price of a call with the given token counts.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        prompt_tokens as f64 * self.prompt_per_token
            + completion_tokens as f64 * self.completion_per_token
    }
}

const OPENAI_RATES: &[(&str, ModelRate)] = &[
    ("gpt-3.5-turbo", ModelRate::per_thousand(0.001, 0.002)),
    ("gpt-3.5-turbo-0125", ModelRate::per_thousand(0.0005, 0.0015)),
    ("gpt-3.5-turbo-16k", ModelRate::per_thousand(0.003, 0.004)),
    ("gpt-4-turbo-preview", ModelRate::per_thousand(0.01, 0.03)),
    ("gpt-4-turbo", ModelRate::per_thousand(0.01, 0.03)),
    ("gpt-4o", ModelRate::per_thousand(0.005, 0.015)),
    ("gpt-4o-2024-08-06", ModelRate::per_thousand(0.0025, 0.010)),
    ("gpt-4o-mini", ModelRate::per_million(0.150, 0.600)),
];

const ANTHROPIC_RATES: &[(&str, ModelRate)] = &[
    ("claude-3-opus-20240229", ModelRate::per_million(15.0, 75.0)),
    ("claude-3-sonnet-20240229", ModelRate::per_million(3.0, 15.0)),
    ("claude-3-5-sonnet-20240620", ModelRate::per_million(3.0, 15.0)),
    ("claude-3-haiku-20240307", ModelRate::per_million(0.25, 1.25)),
];

const OPENROUTER_RATES: &[(&str, ModelRate)] = &[
    ("openai/gpt-3.5-turbo", ModelRate::per_thousand(0.001, 0.002)),
    ("openai/gpt-3.5-turbo-16k", ModelRate::per_thousand(0.003, 0.004)),
    ("openai/gpt-4-turbo-preview", ModelRate::per_thousand(0.01, 0.03)),
    ("anthropic/claude-3-opus", ModelRate::per_million(15.0, 75.0)),
    ("anthropic/claude-3-sonnet", ModelRate::per_million(3.0, 15.0)),
    ("anthropic/claude-3-5-sonnet-20240620", ModelRate::per_million(3.0, 15.0)),
    ("anthropic/claude-3-haiku", ModelRate::per_million(0.25, 1.25)),
];

/// Rate for a provider and model; unmapped pairs are free.
pub fn rate(kind: ProviderKind, model: &str) -> ModelRate {
    let table = match kind {
        ProviderKind::OpenAi => OPENAI_RATES,
        ProviderKind::OpenRouter => OPENROUTER_RATES,
        ProviderKind::Anthropic => ANTHROPIC_RATES,
    };
    table
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rate)| *rate)
        .unwrap_or_default()
}

/// Cost in USD of a call against `(kind, model)`.
///
/// # Examples
///
/// ```
/// use modelgate::config::ProviderKind;
/// use modelgate::pricing::cost;
///
/// let usd = cost(ProviderKind::Anthropic, "claude-3-haiku-20240307", 1_000_000, 0);
/// assert!((usd - 0.25).abs() < 1e-9);
/// assert_eq!(cost(ProviderKind::OpenAi, "gpt-99", 10, 10), 0.0);
/// ```
pub fn cost(kind: ProviderKind, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    rate(kind, model).cost(prompt_tokens, completion_tokens)
}
