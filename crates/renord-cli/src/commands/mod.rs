//! CLI subcommands.

pub mod batch;
pub mod config;
pub mod process;

use std::path::Path;
use std::sync::Arc;

use console::style;
use renord_core::models::config::RenordConfig;
use renord_core::{EngineRegistry, register_local_engines};
use tracing::warn;

/// Load configuration, preferring an explicit `--config` path.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<RenordConfig> {
    match config_path {
        Some(path) => Ok(RenordConfig::from_file(Path::new(path))?),
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                Ok(RenordConfig::from_file(&default_path)?)
            } else {
                Ok(RenordConfig::default())
            }
        }
    }
}

/// Build the engine registry from a model directory, if one is usable.
///
/// A missing or unloadable model set is not fatal here: documents with an
/// embedded text layer still process, and scanned documents will surface a
/// per-document no-engine error in the report.
pub fn build_registry(model_dir: Option<&Path>) -> EngineRegistry {
    let mut registry = EngineRegistry::new();

    let dir = model_dir
        .map(|d| d.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("models"));

    match register_local_engines(&mut registry, &dir) {
        Ok(()) => {}
        Err(e) => {
            warn!("OCR models not loaded from {}: {}", dir.display(), e);
            eprintln!(
                "{} OCR models not available ({}); only embedded-text PDFs will match.",
                style("!").yellow(),
                e
            );
        }
    }

    registry
}

/// Shared batch driver: runs the processor with a ctrl-c handler attached.
pub async fn run_with_cancellation(
    processor: Arc<renord_core::BatchProcessor>,
    files: Vec<std::path::PathBuf>,
) -> renord_core::BatchReport {
    let cancel = processor.cancel_flag();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} Cancellation requested, letting in-flight documents drain...",
                style("!").yellow()
            );
            cancel.cancel();
        }
    });

    let report = processor.run(files).await;
    ctrl_c.abort();
    report
}
