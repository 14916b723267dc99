//! Data models for documents, records, outcomes and configuration.

pub mod config;
pub mod document;
pub mod outcome;
pub mod record;

pub use config::StmtConfig;
pub use document::{classify, DocumentKind, DocumentRef};
pub use outcome::{BatchOutcome, DocumentOutcome, DocumentStatus, Failure, PageOutcome, TextStats};
pub use record::{ExtractedRecord, RecordMetrics};
