//! Token estimation and length bounding of OCR text.

use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

use crate::error::StmtError;
use crate::models::config::TokenizerKind;

/// Estimates how many tokens a text costs.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Whether counts match the service tokenizer rather than estimate it.
    fn is_exact(&self) -> bool;
}

/// Byte-pair encoding with the `cl100k_base` vocabulary.
pub struct BpeTokenCounter {
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub fn new() -> Result<Self, StmtError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| StmtError::Config(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn is_exact(&self) -> bool {
        true
    }
}

/// Four characters per token, rounded up.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproximateTokenCounter;

impl TokenCounter for ApproximateTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn is_exact(&self) -> bool {
        false
    }
}

/// Build the configured tokenizer, falling back to the approximate one.
pub fn tokenizer_for(kind: TokenizerKind) -> Box<dyn TokenCounter> {
    match kind {
        TokenizerKind::Approximate => Box::new(ApproximateTokenCounter),
        TokenizerKind::Bpe => match BpeTokenCounter::new() {
            Ok(counter) => Box::new(counter),
            Err(e) => {
                warn!("{}; token counts will be approximate", e);
                Box::new(ApproximateTokenCounter)
            }
        },
    }
}

/// OCR text capped to a token budget.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoundedText {
    pub text: String,
    /// Token estimate of the text before any cut.
    pub token_estimate: usize,
    pub truncated: bool,
    /// The estimate came from the fallback tokenizer.
    pub approximate: bool,
}

impl BoundedText {
    /// The value for pages without any text.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when there is nothing worth sending to the service.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Caps text length by estimated token count.
pub struct TokenBounder {
    counter: Box<dyn TokenCounter>,
    budget: usize,
}

impl TokenBounder {
    pub fn new(counter: Box<dyn TokenCounter>, budget: usize) -> Self {
        Self { counter, budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bound `text` to the default budget.
    pub fn bound(&self, text: &str) -> BoundedText {
        self.bound_to(text, self.budget)
    }

    /// Bound `text` to `budget` tokens.
    ///
    /// When the estimate exceeds the budget the text is cut to its first
    /// `budget` characters. The cut ignores word boundaries and is idempotent.
    pub fn bound_to(&self, text: &str, budget: usize) -> BoundedText {
        if text.trim().is_empty() {
            return BoundedText::empty();
        }

        let token_estimate = self.counter.count(text);
        let approximate = !self.counter.is_exact();

        if token_estimate <= budget {
            return BoundedText {
                text: text.to_string(),
                token_estimate,
                truncated: false,
                approximate,
            };
        }

        let cut: String = text.chars().take(budget).collect();
        let truncated = cut.len() < text.len();
        if truncated {
            debug!(
                "Truncated text from ~{} tokens to {} characters",
                token_estimate, budget
            );
        }

        BoundedText {
            text: cut,
            token_estimate,
            truncated,
            approximate,
        }
    }
}
