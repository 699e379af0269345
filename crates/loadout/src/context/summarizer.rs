//! Window summarization used by the first eviction stage.
//!
//! The default [`TruncatingSummarizer`] keeps a prefix of the content. A
//! model-backed summarizer can be plugged in through
//! [`ContextBudgetManager::with_summarizer`](super::ContextBudgetManager::with_summarizer).
//! Summarization runs while the budget lock is held, so implementations
//! must not block for long.

/// Output of one summarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub content: String,
    pub tokens: usize,
}

/// Shrinks window content to roughly `ratio` of its size.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, content: &str, tokens: usize, ratio: f64) -> Summary;
}

/// Keeps the first `ratio` of the characters followed by `...`.
///
/// Tokens are recomputed as `floor(tokens * ratio)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncatingSummarizer;

impl Summarizer for TruncatingSummarizer {
    fn summarize(&self, content: &str, tokens: usize, ratio: f64) -> Summary {
        let ratio = ratio.clamp(0.0, 1.0);
        let keep = (content.chars().count() as f64 * ratio) as usize;
        let mut summary: String = content.chars().take(keep).collect();
        summary.push_str("...");
        Summary {
            content: summary,
            tokens: (tokens as f64 * ratio) as usize,
        }
    }
}
