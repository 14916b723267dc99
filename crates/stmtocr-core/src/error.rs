//! Error types for the stmtocr-core library.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the stmtocr library.
///
/// Only `Config` is fatal for a batch run; everything that can go wrong while
/// processing a single document is a [`PipelineError`] and stays inside that
/// document's outcome.
#[derive(Error, Debug)]
pub enum StmtError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Remote extraction service error.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// Per-document pipeline error.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error. Aborts a run before any document is touched.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors related to PDF rasterization.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to turn a page into an image.
    #[error("failed to rasterize page {page}: {reason}")]
    Rasterize { page: u32, reason: String },

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Failed to write a page image.
    #[error("failed to write page image {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Errors raised by the remote extraction service.
///
/// All variants are transport-level failures; content that arrives but does
/// not parse is reported as [`PipelineError::MalformedExtraction`] instead.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Connection could not be established or was dropped.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Credential rejected by the service.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Rate limit or quota exhausted.
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// Any other non-success HTTP status.
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response envelope could not be read.
    #[error("invalid service response: {0}")]
    InvalidResponse(String),
}

/// Failures that stop a page (or a whole document) from producing a record.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The PDF produced no page images.
    #[error("rasterization failed: {0}")]
    Rasterization(String),

    /// A page image could not be decoded.
    #[error("could not read image {path}: {reason}")]
    ImageDecode { path: PathBuf, reason: String },

    /// The recognizer raised.
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),

    /// OCR produced no usable text; the remote service was not called.
    #[error("no text extracted")]
    EmptyText,

    /// Network, auth, quota or timeout failure of the remote call.
    #[error("remote service failed: {0}")]
    RemoteService(#[from] ServiceError),

    /// The service answered but the answer is not a JSON object.
    #[error("malformed extraction: {reason}")]
    MalformedExtraction { reason: String, raw_response: String },

    /// An output artifact could not be written.
    #[error("could not write {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// The worker processing the document stopped unexpectedly.
    #[error("worker aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Classify the error for reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Rasterization(_) => FailureKind::Rasterization,
            PipelineError::ImageDecode { .. } => FailureKind::ImageDecode,
            PipelineError::Ocr(_) => FailureKind::Ocr,
            PipelineError::EmptyText => FailureKind::EmptyText,
            PipelineError::RemoteService(_) => FailureKind::RemoteService,
            PipelineError::MalformedExtraction { .. } => FailureKind::MalformedExtraction,
            PipelineError::Persistence { .. } => FailureKind::Persistence,
            PipelineError::Aborted(_) => FailureKind::Aborted,
        }
    }

    /// Whether the orchestrator may retry the failed step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::RemoteService(_))
    }
}

/// Failure classification used in outcomes and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Rasterization,
    ImageDecode,
    Ocr,
    EmptyText,
    RemoteService,
    MalformedExtraction,
    Persistence,
    Aborted,
}

impl FailureKind {
    /// Snake-case label used in logs and CSV summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Rasterization => "rasterization",
            FailureKind::ImageDecode => "image_decode",
            FailureKind::Ocr => "ocr",
            FailureKind::EmptyText => "empty_text",
            FailureKind::RemoteService => "remote_service",
            FailureKind::MalformedExtraction => "malformed_extraction",
            FailureKind::Persistence => "persistence",
            FailureKind::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for the stmtocr library.
pub type Result<T> = std::result::Result<T, StmtError>;
