//! Core library for bank statement digitization.
//!
//! This crate provides:
//! - Document classification and PDF page rasterization
//! - Skew correction and OCR of scanned pages
//! - Token bounding of OCR text
//! - Structured extraction through a remote text model
//! - A per-document pipeline and a batch orchestrator over per-bank folders

pub mod error;
pub mod extraction;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod pipeline;

pub use error::{FailureKind, PipelineError, Result, StmtError};
pub use extraction::{isolate_json, ExtractionRequest, ExtractionService, GeminiClient, StructuredExtractor};
pub use models::{
    classify, BatchOutcome, DocumentKind, DocumentOutcome, DocumentRef, DocumentStatus, ExtractedRecord,
    StmtConfig,
};
pub use ocr::{BoundedText, Deskewer, TextRecognizer, TokenBounder, TokenCounter};
pub use pdf::{PageRasterizer, PageSplitter, RasterOptions};
pub use pipeline::{BatchOrchestrator, BatchProgress, BatchScope, DocumentPipeline, NoProgress};
