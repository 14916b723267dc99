//! Models command - download and manage the OCR model files.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand, ValueEnum};
use console::style;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};

/// Arguments for the models command.
#[derive(Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    command: ModelsCommand,
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List available model variants
    List,

    /// Download models
    Download(DownloadArgs),

    /// Check which model files are present
    Status(StatusArgs),

    /// Remove downloaded models
    Clean(CleanArgs),

    /// Set the active model variant
    Use(UseArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelVariant {
    /// Mobile detection model - smaller, faster
    Mobile,
    /// Server detection model - better on dense statement tables
    Server,
}

impl ModelVariant {
    const ALL: [ModelVariant; 2] = [ModelVariant::Mobile, ModelVariant::Server];
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::Mobile => write!(f, "mobile"),
            ModelVariant::Server => write!(f, "server"),
        }
    }
}

#[derive(Args)]
struct DownloadArgs {
    /// Model variant to download
    #[arg(short, long, value_enum, default_value = "mobile")]
    variant: ModelVariant,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force re-download even if files exist
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Check specific variant only
    #[arg(short, long, value_enum)]
    variant: Option<ModelVariant>,
}

#[derive(Args)]
struct CleanArgs {
    /// Clean specific variant only
    #[arg(short, long, value_enum)]
    variant: Option<ModelVariant>,

    /// Clean all variants
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct UseArgs {
    /// Variant to set as active
    #[arg(value_enum)]
    variant: ModelVariant,
}

/// One downloadable model file.
struct ModelFile {
    filename: &'static str,
    size_bytes: u64,
    description: &'static str,
    url: &'static str,
}

/// The three files the recognizer needs.
fn model_files(variant: ModelVariant) -> [ModelFile; 3] {
    match variant {
        ModelVariant::Mobile => [
            ModelFile {
                filename: "det.onnx",
                size_bytes: 4_500_000,
                description: "PP-OCRv3 mobile detection",
                url: "https://github.com/jakubmatias/incr/raw/main/models/mobile/det.onnx",
            },
            ModelFile {
                filename: "latin_rec.onnx",
                size_bytes: 7_500_000,
                description: "Latin recognition",
                url: "https://github.com/jakubmatias/incr/raw/main/models/mobile/latin_rec.onnx",
            },
            ModelFile {
                filename: "latin_dict.txt",
                size_bytes: 2_000,
                description: "Latin character dictionary",
                url: "https://github.com/jakubmatias/incr/raw/main/models/mobile/latin_dict.txt",
            },
        ],
        ModelVariant::Server => [
            ModelFile {
                filename: "det.onnx",
                size_bytes: 84_000_000,
                description: "PP-OCRv5 server detection",
                url: "https://github.com/jakubmatias/incr/raw/main/models/server/det.onnx",
            },
            ModelFile {
                filename: "latin_rec.onnx",
                size_bytes: 7_500_000,
                description: "Latin recognition",
                url: "https://github.com/jakubmatias/incr/raw/main/models/server/latin_rec.onnx",
            },
            ModelFile {
                filename: "latin_dict.txt",
                size_bytes: 2_000,
                description: "Latin character dictionary",
                url: "https://github.com/jakubmatias/incr/raw/main/models/server/latin_dict.txt",
            },
        ],
    }
}

fn data_home() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stmtocr")
}

/// Get the model directory for a specific variant
pub fn get_variant_dir(variant: ModelVariant) -> PathBuf {
    data_home().join("models").join(variant.to_string())
}

/// Get the active variant, mobile unless another one was selected
pub fn get_active_variant() -> ModelVariant {
    match fs::read_to_string(data_home().join("active_variant")) {
        Ok(content) if content.trim() == "server" => ModelVariant::Server,
        _ => ModelVariant::Mobile,
    }
}

fn set_active_variant(variant: ModelVariant) -> anyhow::Result<()> {
    let home = data_home();
    fs::create_dir_all(&home)?;
    fs::write(home.join("active_variant"), variant.to_string())?;
    Ok(())
}

pub async fn run(args: ModelsArgs) -> anyhow::Result<()> {
    match args.command {
        ModelsCommand::List => list_models(),
        ModelsCommand::Download(download_args) => download_models(download_args).await,
        ModelsCommand::Status(status_args) => check_status(status_args),
        ModelsCommand::Clean(clean_args) => clean_models(clean_args),
        ModelsCommand::Use(use_args) => use_variant(use_args),
    }
}

fn list_models() -> anyhow::Result<()> {
    println!("{}", style("Available Model Variants").bold());
    println!();

    let active = get_active_variant();

    for variant in ModelVariant::ALL {
        let files = model_files(variant);
        let total: u64 = files.iter().map(|m| m.size_bytes).sum();
        let marker = if variant == active { " (active)" } else { "" };

        println!(
            "{} {}{}",
            style(format!("▸ {}", variant)).bold().cyan(),
            format_size(total),
            style(marker).green().bold()
        );
        for model in &files {
            println!(
                "    {:<20} {:>10}  {}",
                model.filename,
                format_size(model.size_bytes),
                model.description
            );
        }
        println!();
    }

    println!("Commands:");
    println!("  stmtocr models download -v mobile    Download mobile models");
    println!("  stmtocr models download -v server    Download server models");
    println!("  stmtocr models use <variant>         Switch active variant");

    Ok(())
}

fn use_variant(args: UseArgs) -> anyhow::Result<()> {
    let dir = get_variant_dir(args.variant);
    if missing_files(args.variant, &dir).next().is_some() {
        println!(
            "{} {} models not downloaded yet.",
            style("⚠").yellow(),
            args.variant
        );
        println!("Run: stmtocr models download -v {}", args.variant);
        return Ok(());
    }

    set_active_variant(args.variant)?;
    println!(
        "{} Switched to {} models",
        style("✓").green(),
        style(args.variant.to_string()).cyan().bold()
    );
    Ok(())
}

/// Files of `variant` absent from `dir` or too small to be complete.
fn missing_files(variant: ModelVariant, dir: &Path) -> impl Iterator<Item = &'static str> + '_ {
    model_files(variant)
        .into_iter()
        .filter(move |m| !is_complete(&dir.join(m.filename), m.size_bytes))
        .map(|m| m.filename)
}

/// A file at least half the expected size is treated as complete.
fn is_complete(path: &Path, expected: u64) -> bool {
    fs::metadata(path)
        .map(|m| m.len() > expected / 2)
        .unwrap_or(false)
}

async fn download_models(args: DownloadArgs) -> anyhow::Result<()> {
    let variant = args.variant;
    let output_dir = args.output.unwrap_or_else(|| get_variant_dir(variant));
    fs::create_dir_all(&output_dir)?;

    println!(
        "{} Downloading {} models to {}",
        style("ℹ").blue(),
        style(variant.to_string()).cyan().bold(),
        output_dir.display()
    );
    println!();

    let client = reqwest::Client::builder()
        .user_agent(concat!("stmtocr/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let mut downloaded = 0;
    let mut skipped = 0;
    let mut failed = Vec::new();

    for model in model_files(variant) {
        let path = output_dir.join(model.filename);

        if !args.force && is_complete(&path, model.size_bytes) {
            println!("  {} {} (already exists)", style("✓").green(), model.filename);
            skipped += 1;
            continue;
        }

        let pb = ProgressBar::new(model.size_bytes);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} {msg:<30} [{bar:25.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(model.filename.to_string());

        match download_file(&client, model.url, &path, &pb).await {
            Ok(()) => {
                pb.finish_with_message(format!("{} {}", style("✓").green(), model.filename));
                downloaded += 1;
            }
            Err(e) => {
                pb.finish_with_message(format!("{} {} - {}", style("✗").red(), model.filename, e));
                failed.push(model.filename);
            }
        }
    }

    println!();
    if failed.is_empty() {
        println!(
            "{} {} models ready ({} downloaded, {} already present)",
            style("✓").green().bold(),
            variant,
            downloaded,
            skipped
        );
        if get_active_variant() != variant {
            println!(
                "{} To use these models, run: stmtocr models use {}",
                style("ℹ").blue(),
                variant
            );
        }
        Ok(())
    } else {
        println!(
            "{} Retry with: stmtocr models download -v {} --force",
            style("⚠").yellow(),
            variant
        );
        anyhow::bail!("failed to download {}", failed.join(", "))
    }
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path, pb: &ProgressBar) -> anyhow::Result<()> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    if let Some(length) = response.content_length() {
        pb.set_length(length);
    }

    // Written next to the target and renamed, so a partial file never
    // looks like a model
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        written += chunk.len() as u64;
        pb.set_position(written);
    }
    file.flush()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn check_status(args: StatusArgs) -> anyhow::Result<()> {
    let active = get_active_variant();

    println!("{}", style("Model Status").bold());
    println!("Active variant: {}", style(active.to_string()).cyan().bold());
    println!();

    let variants = match args.variant {
        Some(v) => vec![v],
        None => ModelVariant::ALL.to_vec(),
    };

    for variant in variants {
        let dir = get_variant_dir(variant);
        let marker = if variant == active {
            style(" ◀ active").green().to_string()
        } else {
            String::new()
        };
        println!("{} {}{}", style(format!("▸ {}", variant)).bold(), dir.display(), marker);

        for model in model_files(variant) {
            let path = dir.join(model.filename);
            let (status, size) = match fs::metadata(&path) {
                Ok(meta) if meta.len() > model.size_bytes / 2 => (style("✓").green(), format_size(meta.len())),
                Ok(meta) => (style("⚠").yellow(), format!("{} (incomplete?)", format_size(meta.len()))),
                Err(_) => (style("✗").red(), "missing".to_string()),
            };
            println!("    {} {:<25} {:>10}", status, model.filename, size);
        }

        if missing_files(variant, &dir).next().is_none() {
            println!("    {} Ready", style("✓").green());
        } else {
            println!(
                "    {} Run 'stmtocr models download -v {}' to download",
                style("⚠").yellow(),
                variant
            );
        }
        println!();
    }

    Ok(())
}

fn clean_models(args: CleanArgs) -> anyhow::Result<()> {
    let variants = if args.all {
        ModelVariant::ALL.to_vec()
    } else if let Some(v) = args.variant {
        vec![v]
    } else {
        println!(
            "{} Specify --all to remove all models or -v <variant> for a specific variant",
            style("ℹ").blue()
        );
        return Ok(());
    };

    let mut removed = 0;
    let mut freed: u64 = 0;

    for variant in variants {
        let dir = get_variant_dir(variant);
        if !dir.exists() {
            continue;
        }

        for model in model_files(variant) {
            let path = dir.join(model.filename);
            if let Ok(meta) = fs::metadata(&path) {
                fs::remove_file(&path)?;
                removed += 1;
                freed += meta.len();
                println!("  {} Removed {}/{}", style("✓").green(), variant, model.filename);
            }
        }

        // Leftovers of interrupted downloads
        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "tmp") {
                let _ = fs::remove_file(&path);
            }
        }
    }

    if removed > 0 {
        println!();
        println!(
            "{} Removed {} files, freed {}",
            style("✓").green(),
            removed,
            format_size(freed)
        );
    } else {
        println!("{} No model files to remove.", style("ℹ").blue());
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1}GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1}MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1}KB", bytes as f64 / 1_000.0)
    } else {
        format!("{}B", bytes)
    }
}
