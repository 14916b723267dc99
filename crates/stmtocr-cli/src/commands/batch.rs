//! Batch processing command for a directory of per-bank statement folders.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::runtime::Handle;

use stmtocr_core::models::{BatchOutcome, DocumentOutcome, DocumentRef};
use stmtocr_core::{BatchOrchestrator, BatchProgress, BatchScope};

use super::{load_config, prepare_pipeline};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input directory containing one folder per bank
    #[arg(short, long, required = true)]
    input: PathBuf,

    /// Process only this bank folder
    #[arg(short, long)]
    bank: Option<String>,

    /// Process at most this many files (first ones found)
    #[arg(long)]
    max_files: Option<usize>,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Number of documents processed at the same time
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,
}

/// Renders batch progress with an indicatif bar.
struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }
}

impl BatchProgress for ProgressReporter {
    fn started(&self, _index: usize, total: usize, doc: &DocumentRef) {
        self.bar.set_length(total as u64);
        self.bar.set_message(format!("{}/{}", doc.bank(), doc.filename()));
    }

    fn finished(&self, outcome: &DocumentOutcome) {
        if let Some(failure) = outcome.first_failure() {
            self.bar.println(format!(
                "{} {} ({}): {}",
                style("✗").red(),
                outcome.document.filename(),
                outcome.status,
                failure
            ));
        }
        self.bar.inc(1);
    }
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(jobs) = args.jobs {
        config.batch.jobs = jobs;
    }

    let scope = match &args.bank {
        Some(bank) => BatchScope::Bank(bank.clone()),
        None => BatchScope::All,
    };

    if let Some(bank) = &args.bank {
        println!("{} Processing bank {}", style("ℹ").blue(), style(bank).cyan().bold());
    }

    let input = args.input.clone();
    let output = args.output.clone();
    let model_dir = args.model_dir.clone();
    let max_files = args.max_files;

    // The pipeline makes blocking HTTP calls, so it lives on a blocking thread.
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<BatchOutcome> {
        let pipeline = prepare_pipeline(&mut config, model_dir)?;
        let orchestrator = BatchOrchestrator::new(&config, pipeline, &input, &output)?;

        let progress = Arc::new(ProgressReporter::new());
        let outcome = if config.batch.jobs > 1 {
            let reporter: Arc<dyn BatchProgress> = progress.clone();
            Handle::current().block_on(Arc::new(orchestrator).run_concurrent(scope, max_files, reporter))?
        } else {
            orchestrator.run(&scope, max_files, progress.as_ref())?
        };

        progress.bar.finish_with_message("Complete");
        Ok(outcome)
    })
    .await??;

    print_summary(&outcome);

    if args.summary {
        let summary_path = args.output.join("summary.csv");
        write_summary(&summary_path, &outcome)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    Ok(())
}

fn print_summary(outcome: &BatchOutcome) {
    println!();
    println!("{}", style("=".repeat(50)).dim());
    println!("{}", style("BATCH PROCESSING SUMMARY").bold());
    println!("{}", style("=".repeat(50)).dim());
    println!("{}", outcome);

    if outcome.failed > 0 || outcome.partial > 0 {
        println!();
        println!("{}", style("Incomplete files:").red());
        for doc in outcome.failures() {
            println!(
                "  - {}/{} [{}]: {}",
                doc.document.bank(),
                doc.document.filename(),
                doc.status,
                doc.first_failure()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}

fn write_summary(path: &Path, outcome: &BatchOutcome) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    let processed_at = chrono::Local::now().to_rfc3339();

    wtr.write_record([
        "bank",
        "filename",
        "kind",
        "status",
        "pages",
        "pages_succeeded",
        "outputs",
        "processing_time_ms",
        "failure_kind",
        "error",
        "processed_at",
    ])?;

    for doc in &outcome.documents {
        let failure = doc.first_failure();
        let outputs = doc
            .outputs()
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(";");

        wtr.write_record([
            doc.document.bank(),
            doc.document.filename(),
            doc.document.kind().as_str(),
            doc.status.as_str(),
            &doc.pages.len().to_string(),
            &doc.pages_succeeded().to_string(),
            &outputs,
            &doc.elapsed.as_millis().to_string(),
            failure.map(|f| f.kind.as_str()).unwrap_or(""),
            failure.map(|f| f.message.as_str()).unwrap_or(""),
            &processed_at,
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stmtocr_core::error::PipelineError;

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut outcome = BatchOutcome::new(1, dir.path());
        outcome.record(DocumentOutcome::failed(
            DocumentRef::from_path("/in/cic/broken.pdf"),
            &PipelineError::Rasterization("PDF has no pages".to_string()),
            Duration::from_millis(12),
        ));

        let path = dir.path().join("summary.csv");
        write_summary(&path, &outcome).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("bank,filename,kind,status"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("cic,broken.pdf,pdf,failed,0,0,,12,rasterization,"));
    }
}
