//! Process command - rename a single invoice file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;

use renord_core::BatchProcessor;
use renord_core::models::document::DocumentStatus;

use super::{build_registry, load_config, run_with_cancellation};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input PDF file
    #[arg(required = true)]
    input: PathBuf,

    /// Model directory for the local OCR engines
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Backup directory root
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Skip the backup step
    #[arg(long)]
    no_backup: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;

    if let Some(ref backup_dir) = args.backup_dir {
        config.batch.backup_dir = backup_dir.clone();
    }
    if args.no_backup {
        config.batch.backup_enabled = false;
    }
    config.batch.max_workers = 1;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let registry = build_registry(args.model_dir.as_deref());
    let processor = Arc::new(BatchProcessor::new(config, registry));

    let report = run_with_cancellation(processor, vec![args.input.clone()]).await;
    let outcome = report
        .outcomes
        .first()
        .ok_or_else(|| anyhow::anyhow!("no outcome produced"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome.status {
        DocumentStatus::Succeeded => {
            println!(
                "{} {} → {}",
                style("✓").green(),
                outcome.source_path.display(),
                outcome
                    .renamed_to
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
            if let Some(order) = &outcome.order_number {
                println!("  order number: {}", style(order).cyan());
            }
            if let Some(backup) = &outcome.backup_path {
                println!("  backup: {}", backup.display());
            }
        }
        DocumentStatus::Skipped => {
            println!(
                "{} No order number found in {}; file left unchanged",
                style("-").yellow(),
                outcome.source_path.display()
            );
        }
        _ => {
            anyhow::bail!(
                "Processing failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}
