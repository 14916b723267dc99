//! CLI application for bank statement OCR and structured extraction.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{banks, batch, config, models, process};

/// Bank statement OCR - turn scanned statements into structured JSON
#[derive(Parser)]
#[command(name = "stmtocr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every statement under a directory of per-bank folders
    Batch(batch::BatchArgs),

    /// List the bank folders of an input directory
    Banks(banks::BanksArgs),

    /// Process a single statement file
    Process(process::ProcessArgs),

    /// Manage OCR models
    Models(models::ModelsArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env file is fine; the environment may already be set
    dotenvy::dotenv().ok();

    // Set up logging based on verbosity, RUST_LOG wins when present
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Execute command
    match cli.command {
        Commands::Batch(args) => batch::run(args, cli.config.as_deref()).await,
        Commands::Banks(args) => banks::run(args).await,
        Commands::Process(args) => process::run(args, cli.config.as_deref()).await,
        Commands::Models(args) => models::run(args).await,
        Commands::Config(args) => config::run(args).await,
    }
}
