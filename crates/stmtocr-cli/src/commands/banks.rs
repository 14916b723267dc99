//! Banks command - list the bank folders of an input directory.

use std::path::PathBuf;

use clap::Args;
use console::style;

use stmtocr_core::models::DocumentKind;
use stmtocr_core::pipeline::list_banks;

/// Arguments for the banks command.
#[derive(Args)]
pub struct BanksArgs {
    /// Input directory containing one folder per bank
    #[arg(short, long, required = true)]
    input: PathBuf,

    /// Also count supported files per bank
    #[arg(long)]
    count: bool,
}

pub async fn run(args: BanksArgs) -> anyhow::Result<()> {
    let banks = list_banks(&args.input)?;

    if banks.is_empty() {
        println!("{} No bank folders found in {}", style("ℹ").blue(), args.input.display());
        return Ok(());
    }

    for bank in &banks {
        if args.count {
            let files = std::fs::read_dir(args.input.join(bank))?
                .filter_map(|entry| entry.ok())
                .filter(|entry| DocumentKind::classify(&entry.path()).is_supported())
                .count();
            println!("{:<30} {:>5} files", bank, files);
        } else {
            println!("{}", bank);
        }
    }

    Ok(())
}
