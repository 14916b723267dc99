//! Per-page, per-document and per-batch results.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FailureKind, PipelineError};
use crate::models::document::{DocumentKind, DocumentRef};

/// Why a page or document did not produce a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&PipelineError> for Failure {
    fn from(error: &PipelineError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Token accounting for the text of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStats {
    pub token_estimate: usize,
    pub truncated: bool,
    pub approximate: bool,
}

/// Result of one page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    /// 1-based page index within the document.
    pub index: u32,
    /// Page image the page was read from.
    pub source: PathBuf,
    /// Skew angle detected on the page, in degrees.
    pub angle: f32,
    /// Saved deskewed image.
    pub corrected_image: Option<PathBuf>,
    /// Token accounting, once text was extracted.
    pub text: Option<TextStats>,
    /// Persisted record.
    pub output: Option<PathBuf>,
    pub failure: Option<Failure>,
}

impl PageOutcome {
    pub fn new(index: u32, source: impl Into<PathBuf>) -> Self {
        Self {
            index,
            source: source.into(),
            angle: 0.0,
            corrected_image: None,
            text: None,
            output: None,
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.output.is_some() && self.failure.is_none()
    }
}

/// Document-level verdict.
///
/// `Succeeded` requires every page to persist a record; a document where
/// some pages did is `PartiallyProcessed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Succeeded,
    PartiallyProcessed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Succeeded => "succeeded",
            DocumentStatus::PartiallyProcessed => "partial",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one document.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub document: DocumentRef,
    pub status: DocumentStatus,
    pub pages: Vec<PageOutcome>,
    /// Whole-document failure (no pages could be produced).
    pub failure: Option<Failure>,
    pub elapsed: Duration,
}

impl DocumentOutcome {
    /// Build the outcome from page results.
    pub fn from_pages(document: DocumentRef, pages: Vec<PageOutcome>, elapsed: Duration) -> Self {
        let succeeded = pages.iter().filter(|p| p.succeeded()).count();
        let status = if pages.is_empty() || succeeded == 0 {
            DocumentStatus::Failed
        } else if succeeded == pages.len() {
            DocumentStatus::Succeeded
        } else {
            DocumentStatus::PartiallyProcessed
        };

        Self {
            document,
            status,
            pages,
            failure: None,
            elapsed,
        }
    }

    /// A document that failed before any page was attempted.
    pub fn failed(document: DocumentRef, error: &PipelineError, elapsed: Duration) -> Self {
        Self {
            document,
            status: DocumentStatus::Failed,
            pages: Vec::new(),
            failure: Some(error.into()),
            elapsed,
        }
    }

    /// Paths of every persisted record, in page order.
    pub fn outputs(&self) -> Vec<&PathBuf> {
        self.pages.iter().filter_map(|p| p.output.as_ref()).collect()
    }

    pub fn pages_succeeded(&self) -> usize {
        self.pages.iter().filter(|p| p.succeeded()).count()
    }

    /// The first failure, document-level or page-level, for reporting.
    pub fn first_failure(&self) -> Option<&Failure> {
        self.failure
            .as_ref()
            .or_else(|| self.pages.iter().find_map(|p| p.failure.as_ref()))
    }
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Documents found by discovery, before any `max_files` cut.
    pub seen: usize,
    /// Documents handed to the pipeline.
    pub attempted: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    /// Attempted image documents.
    pub images: usize,
    /// Attempted PDF documents.
    pub pdfs: usize,
    pub elapsed: Duration,
    pub output_dir: PathBuf,
    /// Per-document results in discovery order.
    pub documents: Vec<DocumentOutcome>,
}

impl BatchOutcome {
    pub fn new(seen: usize, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            seen,
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Count one finished document.
    pub fn record(&mut self, outcome: DocumentOutcome) {
        self.attempted += 1;
        match outcome.document.kind() {
            DocumentKind::Image => self.images += 1,
            DocumentKind::Pdf => self.pdfs += 1,
            DocumentKind::Unknown => {}
        }
        match outcome.status {
            DocumentStatus::Succeeded => self.succeeded += 1,
            DocumentStatus::PartiallyProcessed => self.partial += 1,
            DocumentStatus::Failed => self.failed += 1,
        }
        self.documents.push(outcome);
    }

    /// Share of attempted documents that fully succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / self.attempted as f64
        }
    }

    /// Mean wall-clock time per attempted document.
    pub fn average_time(&self) -> Duration {
        if self.attempted == 0 {
            Duration::ZERO
        } else {
            self.elapsed / self.attempted as u32
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.documents
            .iter()
            .filter(|d| d.status != DocumentStatus::Succeeded)
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total files processed: {}", self.attempted)?;
        writeln!(f, "  - Images: {}", self.images)?;
        writeln!(f, "  - PDFs: {}", self.pdfs)?;
        writeln!(f, "Successful: {}", self.succeeded)?;
        writeln!(f, "Partially processed: {}", self.partial)?;
        writeln!(f, "Failed: {}", self.failed)?;
        writeln!(f, "Success rate: {:.1}%", self.success_rate())?;
        writeln!(f, "Total time: {:.1} seconds", self.elapsed.as_secs_f64())?;
        writeln!(
            f,
            "Average time per file: {:.1} seconds",
            self.average_time().as_secs_f64()
        )?;
        write!(f, "Output directory: {}", self.output_dir.display())
    }
}
