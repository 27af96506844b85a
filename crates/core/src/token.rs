//! Token counting capability used for prompt budget accounting.

/// Counts the tokens a piece of text costs under some tokenizer.
///
/// Implementations must be cheap to call repeatedly and safe to share across
/// concurrent requests.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}
