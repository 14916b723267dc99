//! Process command - extract statement data from a single file.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use stmtocr_core::models::{DocumentKind, DocumentOutcome, DocumentRef, DocumentStatus, ExtractedRecord};

use super::{load_config, prepare_pipeline};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Bank label used in the instructions (default: parent folder name)
    #[arg(short, long)]
    bank: Option<String>,

    /// Directory for per-page JSON records
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Format of what is printed to stdout
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON records
    Json,
    /// Transactions as CSV
    Csv,
    /// Plain text summary
    Text,
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;

    if !args.input.is_file() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    if !DocumentKind::classify(&args.input).is_supported() {
        anyhow::bail!("Unsupported file format: {}", args.input.display());
    }

    let doc = match &args.bank {
        Some(bank) => DocumentRef::new(&args.input, bank.as_str()),
        None => DocumentRef::from_path(&args.input),
    };
    let output_dir = args.output.clone();
    let model_dir = args.model_dir.clone();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb.set_message(format!("Processing {}...", doc.filename()));

    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<DocumentOutcome> {
        let pipeline = prepare_pipeline(&mut config, model_dir)?;
        fs::create_dir_all(&output_dir)?;
        let instructions = config.batch.instructions_for(doc.bank());
        Ok(pipeline.process(&doc, &output_dir, &instructions))
    })
    .await??;

    pb.finish_and_clear();
    debug!("Processed {} in {:?}", outcome.document.filename(), outcome.elapsed);

    for page in &outcome.pages {
        if let Some(failure) = &page.failure {
            eprintln!("{} page {}: {}", style("✗").red(), page.index, failure);
        }
    }
    if let Some(failure) = &outcome.failure {
        eprintln!("{} {}", style("✗").red(), failure);
    }

    let records = load_records(&outcome.outputs())?;
    if !records.is_empty() {
        println!("{}", format_records(&records, args.format)?);
    }

    match outcome.status {
        DocumentStatus::Succeeded => {
            eprintln!(
                "{} {} page(s) written to {}",
                style("✓").green(),
                records.len(),
                args.output.display()
            );
            Ok(())
        }
        DocumentStatus::PartiallyProcessed => {
            eprintln!(
                "{} {}/{} pages processed",
                style("⚠").yellow(),
                outcome.pages_succeeded(),
                outcome.pages.len()
            );
            Ok(())
        }
        DocumentStatus::Failed => anyhow::bail!("Failed to process {}", outcome.document.filename()),
    }
}

fn load_records(paths: &[&PathBuf]) -> anyhow::Result<Vec<(String, ExtractedRecord)>> {
    paths
        .iter()
        .map(|path| {
            let record: ExtractedRecord = serde_json::from_str(&fs::read_to_string(path)?)?;
            Ok((file_label(path), record))
        })
        .collect()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn format_records(records: &[(String, ExtractedRecord)], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => {
            let values: Vec<&ExtractedRecord> = records.iter().map(|(_, r)| r).collect();
            if values.len() == 1 {
                Ok(serde_json::to_string_pretty(values[0])?)
            } else {
                Ok(serde_json::to_string_pretty(&values)?)
            }
        }
        OutputFormat::Csv => format_csv(records),
        OutputFormat::Text => Ok(format_text(records)),
    }
}

/// One CSV table of all transactions, prefixed by the page file they came from.
fn format_csv(records: &[(String, ExtractedRecord)]) -> anyhow::Result<String> {
    let mut columns: Vec<String> = Vec::new();
    for (_, record) in records {
        for column in record.transaction_columns() {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
    }

    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["page".to_string()];
    header.extend(columns.iter().cloned());
    wtr.write_record(&header)?;

    for (label, record) in records {
        let own = record.transaction_columns();
        for row in record.transaction_rows() {
            let mut line = vec![label.clone()];
            line.extend(columns.iter().map(|c| {
                own.iter()
                    .position(|o| o == c)
                    .and_then(|i| row.get(i).cloned())
                    .unwrap_or_default()
            }));
            wtr.write_record(&line)?;
        }
    }

    Ok(String::from_utf8(wtr.into_inner()?)?)
}

fn format_text(records: &[(String, ExtractedRecord)]) -> String {
    let mut output = String::new();

    for (label, record) in records {
        let metrics = record.metrics();
        let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

        output.push_str(&format!("{}\n", label));
        output.push_str(&format!("  Bank:           {}\n", or_dash(metrics.bank)));
        output.push_str(&format!("  Account:        {}\n", or_dash(metrics.account_number)));
        output.push_str(&format!("  Statement date: {}\n", or_dash(metrics.statement_date)));
        output.push_str(&format!("  Period:         {}\n", or_dash(metrics.statement_period)));
        output.push_str(&format!("  Balance:        {}\n", or_dash(metrics.balance)));
        output.push_str(&format!("  Transactions:   {}\n", metrics.transaction_count));
        output.push_str(&format!("  Total credits:  {:.2}\n", metrics.total_credits));
        output.push_str(&format!("  Total debits:   {:.2}\n", metrics.total_debits));

        let missing = record.missing_keys();
        if !missing.is_empty() {
            output.push_str(&format!("  Missing:        {}\n", missing.join(", ")));
        }
        output.push('\n');
    }

    output.trim_end().to_string()
}
