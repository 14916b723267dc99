//! Structured extraction of statement records through a remote text model.

mod gemini;
mod json;

pub use gemini::GeminiClient;
pub use json::{isolate_json, parse_record};

use tracing::debug;

use crate::error::{PipelineError, ServiceError};
use crate::models::ExtractedRecord;
use crate::ocr::BoundedText;

/// One call to the extraction service.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    /// Per-document instructions.
    pub instructions: String,
    /// Bounded page text.
    pub text: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ExtractionRequest {
    /// Instructions and text, newline separated and newline terminated.
    pub fn payload(&self) -> String {
        let mut payload = String::with_capacity(self.instructions.len() + self.text.len() + 2);
        payload.push_str(&self.instructions);
        payload.push('\n');
        payload.push_str(&self.text);
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        payload
    }
}

/// A remote model that turns a request into response text.
pub trait ExtractionService: Send + Sync {
    fn generate(&self, request: &ExtractionRequest) -> Result<String, ServiceError>;
}

impl<T: ExtractionService + ?Sized> ExtractionService for std::sync::Arc<T> {
    fn generate(&self, request: &ExtractionRequest) -> Result<String, ServiceError> {
        (**self).generate(request)
    }
}

/// Turns bounded page text into a record.
///
/// Service failures are returned as they are; retrying is up to the caller.
pub struct StructuredExtractor {
    service: Box<dyn ExtractionService>,
    max_output_tokens: u32,
}

impl StructuredExtractor {
    pub fn new(service: Box<dyn ExtractionService>, max_output_tokens: u32) -> Self {
        Self {
            service,
            max_output_tokens,
        }
    }

    /// Build the deterministic request for `text`.
    pub fn request(&self, text: &BoundedText, instructions: &str) -> ExtractionRequest {
        ExtractionRequest {
            instructions: instructions.to_string(),
            text: text.text.clone(),
            temperature: 0.0,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn extract(&self, text: &BoundedText, instructions: &str) -> Result<ExtractedRecord, PipelineError> {
        if text.is_empty() {
            return Err(PipelineError::EmptyText);
        }

        let request = self.request(text, instructions);
        let response = self.service.generate(&request)?;
        debug!("Service returned {} characters", response.len());

        parse_record(&response)
    }
}
