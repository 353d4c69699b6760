//! Batch command - rename many invoice files.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};

use renord_core::models::document::{DocumentStatus, NoMatchPolicy};
use renord_core::{BatchProcessor, BatchReport};

use super::{build_registry, load_config, run_with_cancellation};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Number of parallel workers
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Model directory for the local OCR engines
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Backup directory root
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Skip backups entirely
    #[arg(long)]
    no_backup: bool,

    /// Mark documents without a match as failed instead of skipped
    #[arg(long)]
    fail_on_no_match: bool,

    /// Write the full report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also write a summary CSV next to the report (or ./summary.csv)
    #[arg(long)]
    summary: bool,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;

    if let Some(jobs) = args.jobs {
        config.batch.max_workers = jobs;
    }
    if let Some(ref backup_dir) = args.backup_dir {
        config.batch.backup_dir = backup_dir.clone();
    }
    if args.no_backup {
        config.batch.backup_enabled = false;
    }
    if args.fail_on_no_match {
        config.batch.on_no_match = NoMatchPolicy::Fail;
    }

    // Expand glob pattern
    let mut files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            ext.eq_ignore_ascii_case("pdf")
        })
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No matching PDF files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    let registry = build_registry(args.model_dir.as_deref());
    let processor = Arc::new(BatchProcessor::new(config, registry));

    // Progress bar fed from the processor's counter
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap()
            .progress_chars("=>-"),
    );

    let mut runner = {
        let processor = processor.clone();
        let files = files.clone();
        tokio::spawn(async move { run_with_cancellation(processor, files).await })
    };

    let report = loop {
        tokio::select! {
            joined = &mut runner => break joined?,
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                pb.set_position(processor.completed_documents() as u64);
            }
        }
    };
    pb.finish_and_clear();

    print_report(&report);

    if let Some(ref report_path) = args.report {
        fs::write(report_path, serde_json::to_string_pretty(&report)?)?;
        println!(
            "{} Report written to {}",
            style("✓").green(),
            report_path.display()
        );
    }

    if args.summary {
        let summary_path = args
            .report
            .as_ref()
            .and_then(|p| p.parent())
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));
        write_summary(&summary_path, &report)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    Ok(())
}

fn print_report(report: &BatchReport) {
    let succeeded = report.count(DocumentStatus::Succeeded);
    let skipped = report.count(DocumentStatus::Skipped);
    let failed = report.count(DocumentStatus::Failed);

    println!();
    println!(
        "{} Processed {} documents in {}ms",
        style("✓").green(),
        report.outcomes.len(),
        report.elapsed_ms
    );
    println!(
        "   {} renamed, {} skipped, {} failed",
        style(succeeded).green(),
        style(skipped).yellow(),
        style(failed).red()
    );

    if report.cancelled {
        println!("   {}", style("batch was cancelled").yellow());
    }

    for outcome in &report.outcomes {
        match outcome.status {
            DocumentStatus::Succeeded => {
                if let (Some(order), Some(renamed)) =
                    (&outcome.order_number, &outcome.renamed_to)
                {
                    println!(
                        "  {} {} → {}  [{}]",
                        style("✓").green(),
                        outcome.source_path.display(),
                        renamed.display(),
                        order
                    );
                }
            }
            DocumentStatus::Skipped => {
                println!(
                    "  {} {}: {}",
                    style("-").yellow(),
                    outcome.source_path.display(),
                    outcome.error.as_deref().unwrap_or("no order number found")
                );
            }
            DocumentStatus::Failed => {
                println!(
                    "  {} {}: {}",
                    style("✗").red(),
                    outcome.source_path.display(),
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }
}

fn write_summary(path: &PathBuf, report: &BatchReport) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "order_number",
        "renamed_to",
        "backup_path",
        "pages_scanned",
        "processing_time_ms",
        "error",
    ])?;

    for outcome in &report.outcomes {
        let filename = outcome
            .source_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let status = match outcome.status {
            DocumentStatus::Succeeded => "succeeded",
            DocumentStatus::Skipped => "skipped",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
        };

        wtr.write_record([
            filename.as_str(),
            status,
            outcome.order_number.as_deref().unwrap_or(""),
            &outcome
                .renamed_to
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            &outcome
                .backup_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            &outcome.pages_scanned.to_string(),
            &outcome.processing_time_ms.to_string(),
            outcome.error.as_deref().unwrap_or(""),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
