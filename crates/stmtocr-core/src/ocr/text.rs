//! OCR of a corrected page into bounded text.

use image::DynamicImage;
use tracing::debug;

use super::{BoundedText, TextRecognizer, TokenBounder};
use crate::error::PipelineError;

/// Recognizes page text and caps it to the token budget.
pub struct TextExtractor {
    recognizer: Box<dyn TextRecognizer>,
    bounder: TokenBounder,
}

impl TextExtractor {
    pub fn new(recognizer: Box<dyn TextRecognizer>, bounder: TokenBounder) -> Self {
        Self { recognizer, bounder }
    }

    /// Extract text with the default budget.
    ///
    /// Blank pages give [`BoundedText::empty`]; the caller decides what that
    /// means.
    pub fn extract(&self, image: &DynamicImage) -> Result<BoundedText, PipelineError> {
        self.extract_with_budget(image, self.bounder.budget())
    }

    pub fn extract_with_budget(&self, image: &DynamicImage, budget: usize) -> Result<BoundedText, PipelineError> {
        let raw = self.recognizer.recognize(image)?;
        let bounded = self.bounder.bound_to(&raw, budget);

        debug!(
            "Extracted {} characters (~{} tokens{}{})",
            bounded.text.chars().count(),
            bounded.token_estimate,
            if bounded.approximate { ", approximate" } else { "" },
            if bounded.truncated { ", truncated" } else { "" }
        );
        Ok(bounded)
    }
}
