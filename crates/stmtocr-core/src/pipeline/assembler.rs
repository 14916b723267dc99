//! Persisting page records and closing out a document.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::debug;

use crate::error::PipelineError;
use crate::models::{DocumentKind, DocumentOutcome, DocumentRef, ExtractedRecord, PageOutcome};
use crate::pdf::SplitPages;

/// Writes one JSON file per page and builds the document outcome.
#[derive(Debug, Default, Clone)]
pub struct PageAssembler;

impl PageAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Where the record of `page` goes: `<stem>.json` for images,
    /// `<stem>_page_<n>.json` for PDF pages.
    pub fn record_path(&self, dir: &Path, doc: &DocumentRef, page: u32) -> PathBuf {
        match doc.kind() {
            DocumentKind::Pdf => dir.join(format!("{}_page_{}.json", doc.stem(), page)),
            _ => dir.join(format!("{}.json", doc.stem())),
        }
    }

    /// Write `record` as 4-space indented UTF-8 JSON.
    pub fn persist(&self, record: &ExtractedRecord, path: &Path) -> Result<PathBuf, PipelineError> {
        let persistence = |reason: String| PipelineError::Persistence {
            path: path.to_path_buf(),
            reason,
        };

        let mut buffer = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
        record
            .serialize(&mut serializer)
            .map_err(|e| persistence(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| persistence(e.to_string()))?;
        }
        fs::write(path, buffer).map_err(|e| persistence(e.to_string()))?;

        debug!("Saved results to {}", path.display());
        Ok(path.to_path_buf())
    }

    /// Close out a document once all its pages ran.
    ///
    /// Each page keeps its own record file; nothing is merged. The scratch
    /// pages are removed here.
    pub fn assemble(
        &self,
        doc: &DocumentRef,
        pages: Vec<PageOutcome>,
        split: SplitPages,
        elapsed: Duration,
    ) -> DocumentOutcome {
        if let Some(scratch) = split.scratch {
            scratch.close();
        }
        DocumentOutcome::from_pages(doc.clone(), pages, elapsed)
    }
}
