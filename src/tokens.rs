//! Prompt token counting for providers that do not report usage while streaming.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tiktoken_rs::CoreBPE;
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};
use tracing::{debug, warn};

use crate::config::ProviderKind;

/// Vocabulary used for OpenRouter, whose routed models have no local tokenizer.
pub const OPENROUTER_STAND_IN_MODEL: &str = "gpt-4-turbo-preview";

/// Encoders already built in this process, one per vocabulary.
static ENCODERS: OnceLock<Mutex<HashMap<Tokenizer, Arc<CoreBPE>>>> = OnceLock::new();

/// Counts tokens with the vocabulary of the target model.
///
/// Resolution order: the model's own BPE, then `cl100k_base`, then a character-ratio
/// heuristic. The result is deterministic for a given `(kind, model, text)`.
///
/// Encoders are built once per process and shared afterwards; only the first
/// counter for a vocabulary pays for loading it.
pub enum PromptTokenCounter {
    Bpe(Arc<CoreBPE>),
    Heuristic(HeuristicEstimator),
}

impl PromptTokenCounter {
    /// Picks the tokenizer for a provider kind and model identifier.
    pub fn for_model(kind: ProviderKind, model: &str) -> Self {
        let vocabulary = match kind {
            ProviderKind::OpenRouter => OPENROUTER_STAND_IN_MODEL,
            _ => model,
        };

        let tokenizer = get_tokenizer(vocabulary).unwrap_or_else(|| {
            debug!(model = vocabulary, "no tokenizer for model, using cl100k_base");
            Tokenizer::Cl100kBase
        });
        match shared_encoder(tokenizer) {
            Some(bpe) => Self::Bpe(bpe),
            None => Self::Heuristic(HeuristicEstimator),
        }
    }

    pub fn count(&self, text: &str) -> u64 {
        match self {
            Self::Bpe(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
            Self::Heuristic(estimator) => estimator.estimate_text(text),
        }
    }
}

/// Loads the encoder for `kind`/`model` ahead of the first streamed request.
pub fn warm(kind: ProviderKind, model: &str) {
    let _ = PromptTokenCounter::for_model(kind, model);
}

fn shared_encoder(tokenizer: Tokenizer) -> Option<Arc<CoreBPE>> {
    let cache = ENCODERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut encoders = match cache.lock() {
        Ok(encoders) => encoders,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(bpe) = encoders.get(&tokenizer) {
        return Some(Arc::clone(bpe));
    }

    match tiktoken_rs::get_bpe_from_tokenizer(tokenizer) {
        Ok(bpe) => {
            let bpe = Arc::new(bpe);
            encoders.insert(tokenizer, Arc::clone(&bpe));
            Some(bpe)
        }
        Err(err) => {
            warn!(?tokenizer, error = %err, "tokenizer unavailable, estimating tokens heuristically");
            None
        }
    }
}

/// Approximates token counts from character composition.
///
/// ASCII-heavy text averages close to four characters per token, CJK-heavy text
/// close to two.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    pub fn estimate_text(&self, text: &str) -> u64 {
        let mut total_chars = 0usize;
        let mut ascii_chars = 0usize;

        for ch in text.chars() {
            total_chars += 1;
            if ch.is_ascii() {
                ascii_chars += 1;
            }
        }

        if total_chars == 0 {
            return 0;
        }

        let ascii_ratio = ascii_chars as f64 / total_chars as f64;
        let chars_per_token = 2.0 + 2.0 * ascii_ratio;
        ((total_chars as f64) / chars_per_token).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_scales_with_content_length() {
        let estimator = HeuristicEstimator;
        let short_tokens = estimator.estimate_text("Hello world!");
        let verbose_tokens = estimator.estimate_text(
            "Hello world! This sentence intentionally repeats itself to emulate higher load.",
        );

        assert!(verbose_tokens >= short_tokens);
        assert!(short_tokens > 0);
        assert_eq!(estimator.estimate_text(""), 0);
    }

    #[test]
    fn bpe_counter_is_deterministic() {
        let counter = PromptTokenCounter::for_model(ProviderKind::OpenAi, "gpt-4o-mini");
        let first = counter.count("You are a helpful assistant.\nSay hello.");
        let second = counter.count("You are a helpful assistant.\nSay hello.");
        assert_eq!(first, second);
        assert!(first > 0);
    }

    #[test]
    fn unknown_model_still_counts() {
        let counter = PromptTokenCounter::for_model(ProviderKind::OpenAi, "not-a-real-model");
        assert!(counter.count("hello there") > 0);

        let counter =
            PromptTokenCounter::for_model(ProviderKind::OpenRouter, "anthropic/claude-3-haiku");
        assert!(matches!(counter, PromptTokenCounter::Bpe(_)));
    }

    #[test]
    fn encoders_are_shared_across_counters() {
        let first = PromptTokenCounter::for_model(ProviderKind::OpenAi, "gpt-4o-mini");
        let second = PromptTokenCounter::for_model(ProviderKind::OpenAi, "gpt-4o-2024-08-06");

        match (&first, &second) {
            (PromptTokenCounter::Bpe(a), PromptTokenCounter::Bpe(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected BPE counters"),
        }
        assert_eq!(first.count("Say hello"), second.count("Say hello"));
    }

    #[test]
    fn unknown_models_share_the_fallback_encoder() {
        warm(ProviderKind::OpenAi, "gpt-4");
        let fallback = PromptTokenCounter::for_model(ProviderKind::OpenAi, "not-a-real-model");
        let cl100k = PromptTokenCounter::for_model(ProviderKind::OpenAi, "gpt-4");

        match (&fallback, &cl100k) {
            (PromptTokenCounter::Bpe(a), PromptTokenCounter::Bpe(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected BPE counters"),
        }
    }
}
