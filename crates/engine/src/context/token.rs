//! Token counters.
//!
//! `TiktokenCounter` gives exact BPE counts for OpenAI-family encodings.
//! `HeuristicCounter` approximates ~4 characters per token and is used when
//! no encoding can be loaded, and in tests.

use std::sync::Arc;

use ragchat_core::token::TokenCounter;
use tracing::{debug, warn};

/// Character-based estimate: 1 token ≈ 4 bytes of text, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

/// Exact BPE token counts via `tiktoken-rs`.
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    /// Load a named encoding such as `cl100k_base` or `o200k_base`.
    pub fn for_encoding(encoding: &str) -> Option<Self> {
        let bpe = match encoding {
            "o200k_base" => tiktoken_rs::o200k_base(),
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
            _ => return None,
        };
        bpe.ok().map(|bpe| Self { bpe })
    }

    /// Load the encoding the model was trained with.
    pub fn for_model(model: &str) -> Option<Self> {
        tiktoken_rs::get_bpe_from_model(model)
            .ok()
            .map(|bpe| Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Pick a counter for the configured encoding, falling back to the model's
/// encoding and finally to the heuristic.
pub fn counter_for(encoding: &str, model: &str) -> Arc<dyn TokenCounter> {
    if let Some(counter) = TiktokenCounter::for_encoding(encoding) {
        debug!(encoding, "Using tiktoken encoding");
        return Arc::new(counter);
    }
    if let Some(counter) = TiktokenCounter::for_model(model) {
        warn!(encoding, model, "Unknown encoding, using the model's encoding");
        return Arc::new(counter);
    }
    warn!(encoding, model, "No tokenizer available, estimating ~4 chars per token");
    Arc::new(HeuristicCounter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_empty_is_zero() {
        assert_eq!(HeuristicCounter.count(""), 0);
    }

    #[test]
    fn heuristic_rounds_up() {
        assert_eq!(HeuristicCounter.count("test"), 1);
        assert_eq!(HeuristicCounter.count("hello"), 2);
        assert_eq!(HeuristicCounter.count(&"a".repeat(100)), 25);
    }

    #[test]
    fn tiktoken_counts_cl100k() {
        let counter = TiktokenCounter::for_encoding("cl100k_base").unwrap();
        assert_eq!(counter.count("hello world"), 2);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn unknown_encoding_is_none() {
        assert!(TiktokenCounter::for_encoding("klingon_base").is_none());
    }

    #[test]
    fn counter_for_falls_back_to_model() {
        let counter = counter_for("klingon_base", "gpt-4");
        assert_eq!(counter.count("hello world"), 2);
    }

    #[test]
    fn counter_for_falls_back_to_heuristic() {
        let counter = counter_for("klingon_base", "my-local-llama");
        assert_eq!(counter.count("abcdefgh"), 2);
    }
}
