//! Configuration structures for the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::StmtError;

/// Instructions sent to the extraction service as its system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert at extracting structured data from bank statements.
Extract all relevant information from the following bank statement text and return it in a well-structured JSON format.

Include the following fields when available:
- bank: Bank name
- statement_date: Date of the statement
- account_number: Account number
- statement_period: Period covered by the statement
- contact_info: Bank contact information (phone, address, website)
- client_info: Customer information (name, address)
- account_details: Account details (IBAN, BIC, balance, etc.)
- transactions: Array of transactions with date, description, debit, credit amounts and balance when shown

Return only valid JSON without any additional text or formatting.";

/// Per-document instructions; `{bank}` is replaced with the bank label.
pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "Extract all relevant data from this {bank} bank statement and return in structured JSON format.";

/// Main configuration for the stmtocr pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StmtConfig {
    /// Remote extraction service configuration.
    pub service: ServiceConfig,

    /// OCR and deskew configuration.
    pub ocr: OcrConfig,

    /// PDF rasterization configuration.
    pub pdf: PdfConfig,

    /// Text bounding configuration.
    pub text: TextConfig,

    /// Batch orchestration configuration.
    pub batch: BatchConfig,

    /// OCR model files.
    pub models: ModelConfig,
}

/// Remote extraction service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the generative language API.
    pub endpoint: String,

    /// Model name.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Resolved API key. Never written to disk.
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Upper bound on generated tokens per call.
    pub max_output_tokens: u32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum simultaneous calls when documents run concurrently.
    pub max_concurrent_requests: usize,

    /// Retries of a page after a transport-level failure (0 = none).
    pub max_retries: u32,

    /// Pause between retries in milliseconds.
    pub retry_backoff_ms: u64,

    /// System instructions sent with every request.
    pub system_prompt: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key: None,
            max_output_tokens: 5000,
            timeout_secs: 120,
            max_concurrent_requests: 2,
            max_retries: 0,
            retry_backoff_ms: 2000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ServiceConfig {
    /// The API key, or a configuration error naming the variable to set.
    pub fn api_key(&self) -> Result<&str, StmtError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(StmtError::Config(format!(
                "{} not found in environment variables",
                self.api_key_env
            ))),
        }
    }
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Keep `[UNK]` markers produced by the recognizer.
    pub keep_unk: bool,

    /// Skew correction settings.
    pub deskew: DeskewConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            keep_unk: false,
            deskew: DeskewConfig::default(),
        }
    }
}

/// Skew detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskewConfig {
    /// Run skew detection at all.
    pub enabled: bool,

    /// Largest skew considered, in degrees (both directions).
    pub max_angle: f32,

    /// Search step in degrees.
    pub angle_step: f32,

    /// Skew below this is treated as straight.
    pub min_angle: f32,

    /// Longer side of the downscaled copy used for detection.
    pub detection_size: u32,
}

impl Default for DeskewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_angle: 5.0,
            angle_step: 0.25,
            min_angle: 0.5,
            detection_size: 1200,
        }
    }
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// DPI for rendering PDF pages to images.
    pub render_dpi: u32,

    /// Maximum pages to process (0 = unlimited).
    pub max_pages: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            render_dpi: 300,
            max_pages: 0,
        }
    }
}

/// Which tokenizer estimates text length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Byte-pair encoding (`cl100k_base`).
    Bpe,
    /// Character-based estimate.
    Approximate,
}

/// Text bounding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Token budget for OCR text sent to the service.
    pub token_budget: usize,

    /// Tokenizer used for the estimate.
    pub tokenizer: TokenizerKind,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            token_budget: 16000,
            tokenizer: TokenizerKind::Bpe,
        }
    }
}

/// Batch orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Documents processed at the same time.
    pub jobs: usize,

    /// Instructions template, `{bank}` is substituted.
    pub prompt_template: String,

    /// Subdirectory of each bank output directory for deskewed pages.
    pub corrected_dir: String,

    /// Subdirectory of each bank output directory for PDF page scratch files.
    pub scratch_dir: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            corrected_dir: "corrected_images".to_string(),
            scratch_dir: "temp_pdf_images".to_string(),
        }
    }
}

impl BatchConfig {
    /// Render the instructions for one bank.
    pub fn instructions_for(&self, bank: &str) -> String {
        self.prompt_template.replace("{bank}", bank)
    }
}

/// OCR model file names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory containing model files (defaults to the active variant).
    pub model_dir: Option<PathBuf>,

    /// Text detection model file name.
    pub detection_model: String,

    /// Text recognition model file name.
    pub recognition_model: String,

    /// Character dictionary file name.
    pub dictionary: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            detection_model: "det.onnx".to_string(),
            recognition_model: "latin_rec.onnx".to_string(),
            dictionary: "latin_dict.txt".to_string(),
        }
    }
}

impl StmtConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Read the API key from the environment variable named in the config.
    ///
    /// A key already present (set programmatically) is kept.
    pub fn resolve_credentials(&mut self) -> Result<(), StmtError> {
        if self.service.api_key.is_none() {
            self.service.api_key = std::env::var(&self.service.api_key_env).ok();
        }
        self.service.api_key().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_behavior() {
        let config = StmtConfig::default();
        assert_eq!(config.text.token_budget, 16000);
        assert_eq!(config.pdf.render_dpi, 300);
        assert_eq!(config.service.max_output_tokens, 5000);
        assert_eq!(config.service.max_retries, 0);
        assert_eq!(config.batch.corrected_dir, "corrected_images");
        assert_eq!(config.batch.scratch_dir, "temp_pdf_images");
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = ServiceConfig::default();
        assert!(matches!(config.api_key(), Err(StmtError::Config(_))));

        let blank = ServiceConfig {
            api_key: Some("   ".to_string()),
            ..ServiceConfig::default()
        };
        assert!(blank.api_key().is_err());
    }

    #[test]
    fn test_resolve_keeps_explicit_key() {
        let mut config = StmtConfig::default();
        config.service.api_key_env = "STMTOCR_TEST_UNSET_VARIABLE".to_string();
        config.service.api_key = Some("secret".to_string());
        assert!(config.resolve_credentials().is_ok());
        assert_eq!(config.service.api_key().unwrap(), "secret");
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = StmtConfig::default();
        config.service.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: StmtConfig =
            serde_json::from_str(r#"{"text": {"token_budget": 800}}"#).unwrap();
        assert_eq!(config.text.token_budget, 800);
        assert_eq!(config.text.tokenizer, TokenizerKind::Bpe);
        assert_eq!(config.service.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_instructions_for_bank() {
        let batch = BatchConfig::default();
        assert_eq!(
            batch.instructions_for("banquepopulaire"),
            "Extract all relevant data from this banquepopulaire bank statement and return in structured JSON format."
        );
    }
}
