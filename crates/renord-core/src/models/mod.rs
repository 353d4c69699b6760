//! Data models shared across the pipeline.

pub mod config;
pub mod document;

pub use config::{BatchConfig, ExtractionConfig, OrchestratorConfig, RasterConfig, RenordConfig};
pub use document::{
    BatchReport, Document, DocumentOutcome, DocumentStatus, NoMatchPolicy, PipelineEvent,
    next_status,
};
