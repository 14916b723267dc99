//! Batch processing of a per-bank directory tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::DocumentPipeline;
use crate::error::{PipelineError, StmtError};
use crate::models::config::BatchConfig;
use crate::models::{BatchOutcome, DocumentOutcome, DocumentRef, StmtConfig};

/// Which part of the input tree to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchScope {
    /// Every bank directory, recursively.
    All,
    /// The files directly inside one bank directory.
    Bank(String),
}

/// Observer of batch progress.
pub trait BatchProgress: Send + Sync {
    /// A document is about to be processed (`index` is 0-based).
    fn started(&self, _index: usize, _total: usize, _doc: &DocumentRef) {}

    /// A document finished, successfully or not.
    fn finished(&self, _outcome: &DocumentOutcome) {}
}

/// Progress observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl BatchProgress for NoProgress {}

/// Discovers documents and drives them through the pipeline.
pub struct BatchOrchestrator {
    pipeline: DocumentPipeline,
    batch: BatchConfig,
    input_root: PathBuf,
    output_dir: PathBuf,
    max_concurrent_requests: usize,
}

impl BatchOrchestrator {
    /// Create an orchestrator over `input_root`.
    ///
    /// Checks the service credential and the input root first; either
    /// problem is a configuration error and nothing is processed.
    pub fn new(
        config: &StmtConfig,
        pipeline: DocumentPipeline,
        input_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, StmtError> {
        if let Err(e) = config.service.api_key() {
            error!("Cannot start batch: {}", e);
            return Err(e);
        }

        let input_root = input_root.into();
        if !input_root.is_dir() {
            let e = StmtError::Config(format!("input directory {} does not exist", input_root.display()));
            error!("Cannot start batch: {}", e);
            return Err(e);
        }

        Ok(Self {
            pipeline,
            batch: config.batch.clone(),
            input_root,
            output_dir: output_dir.into(),
            max_concurrent_requests: config.service.max_concurrent_requests,
        })
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Names of the bank directories under the input root, sorted.
    pub fn list_banks(&self) -> Result<Vec<String>, StmtError> {
        list_banks(&self.input_root)
    }

    /// Supported documents in scope, in traversal order.
    pub fn discover(&self, scope: &BatchScope) -> Result<Vec<DocumentRef>, StmtError> {
        let documents = match scope {
            BatchScope::All => discover_tree(&self.input_root),
            BatchScope::Bank(bank) => discover_bank(&self.input_root, bank)?,
        };
        debug!("Discovered {} documents", documents.len());
        Ok(documents)
    }

    /// Process documents one after another.
    pub fn run(
        &self,
        scope: &BatchScope,
        max_files: Option<usize>,
        progress: &dyn BatchProgress,
    ) -> Result<BatchOutcome, StmtError> {
        let start = Instant::now();
        let (documents, seen) = self.plan(scope, max_files)?;
        let total = documents.len();

        let mut outcome = BatchOutcome::new(seen, &self.output_dir);
        for (index, doc) in documents.iter().enumerate() {
            progress.started(index, total, doc);
            let result = self.process_document(doc);
            progress.finished(&result);
            outcome.record(result);
        }

        outcome.elapsed = start.elapsed();
        log_summary(&outcome);
        Ok(outcome)
    }

    /// Process documents on blocking workers.
    ///
    /// At most `min(jobs, max_concurrent_requests)` documents run at a time,
    /// which also bounds simultaneous service calls. Results are counted in
    /// discovery order.
    pub async fn run_concurrent(
        self: Arc<Self>,
        scope: BatchScope,
        max_files: Option<usize>,
        progress: Arc<dyn BatchProgress>,
    ) -> Result<BatchOutcome, StmtError> {
        let start = Instant::now();
        let (documents, seen) = self.plan(&scope, max_files)?;
        let total = documents.len();

        let workers = self.batch.jobs.min(self.max_concurrent_requests).max(1);
        info!("Processing with {} workers", workers);
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut handles = Vec::with_capacity(total);
        for (index, doc) in documents.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Aborted(e.to_string()))?;

            let this = Arc::clone(&self);
            let progress = Arc::clone(&progress);
            let task_doc = doc.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                progress.started(index, total, &task_doc);
                let result = this.process_document(&task_doc);
                progress.finished(&result);
                result
            });
            handles.push((doc, handle));
        }

        let mut outcome = BatchOutcome::new(seen, &self.output_dir);
        for (doc, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let error = PipelineError::Aborted(e.to_string());
                    warn!("Worker for {} stopped: {}", doc.filename(), error);
                    DocumentOutcome::failed(doc, &error, Duration::ZERO)
                }
            };
            outcome.record(result);
        }

        outcome.elapsed = start.elapsed();
        log_summary(&outcome);
        Ok(outcome)
    }

    /// Discover and cut to `max_files`. Returns the documents and how many
    /// were found before the cut.
    fn plan(&self, scope: &BatchScope, max_files: Option<usize>) -> Result<(Vec<DocumentRef>, usize), StmtError> {
        let mut documents = self.discover(scope)?;
        let seen = documents.len();

        if let Some(max) = max_files {
            documents.truncate(max);
        }

        match scope {
            BatchScope::All => info!("Found {} files to process", documents.len()),
            BatchScope::Bank(bank) => info!("Found {} files to process for bank {}", documents.len(), bank),
        }
        if documents.len() < seen {
            info!("Limited to the first {} of {} files", documents.len(), seen);
        }

        Ok((documents, seen))
    }

    fn process_document(&self, doc: &DocumentRef) -> DocumentOutcome {
        let bank_dir = self.output_dir.join(doc.bank());
        if let Err(e) = fs::create_dir_all(&bank_dir) {
            let error = PipelineError::Persistence {
                path: bank_dir,
                reason: e.to_string(),
            };
            warn!("Failed to process {}: {}", doc.filename(), error);
            return DocumentOutcome::failed(doc.clone(), &error, Duration::ZERO);
        }

        let instructions = self.batch.instructions_for(doc.bank());
        self.pipeline.process(doc, &bank_dir, &instructions)
    }
}

/// Names of the subdirectories of `root`, sorted.
pub fn list_banks(root: &Path) -> Result<Vec<String>, StmtError> {
    if !root.is_dir() {
        return Err(StmtError::Config(format!(
            "input directory {} does not exist",
            root.display()
        )));
    }

    let mut banks: Vec<String> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    banks.sort();
    Ok(banks)
}

/// Every supported file under `root`, labelled with its parent directory.
fn discover_tree(root: &Path) -> Vec<DocumentRef> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| DocumentRef::from_path(entry.into_path()))
        .filter(|doc| doc.kind().is_supported())
        .collect()
}

/// Supported files directly inside `root/bank`, sorted by name.
fn discover_bank(root: &Path, bank: &str) -> Result<Vec<DocumentRef>, StmtError> {
    let dir = root.join(bank);
    if !dir.is_dir() {
        return Err(StmtError::Config(format!(
            "bank directory {} does not exist",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| DocumentRef::new(path, bank))
        .filter(|doc| doc.kind().is_supported())
        .collect())
}

fn log_summary(outcome: &BatchOutcome) {
    info!(
        "Batch finished: {} processed, {} succeeded, {} partial, {} failed ({:.1}% success) in {:.1}s",
        outcome.attempted,
        outcome.succeeded,
        outcome.partial,
        outcome.failed,
        outcome.success_rate(),
        outcome.elapsed.as_secs_f64()
    );
    for doc in outcome.failures() {
        if let Some(failure) = doc.first_failure() {
            warn!("{} ({}): {}", doc.document.filename(), doc.status, failure);
        }
    }
}
