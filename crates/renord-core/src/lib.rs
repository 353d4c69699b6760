//! Core library for OCR-driven invoice renaming.
//!
//! This crate provides:
//! - PDF page access (embedded scan and text extraction)
//! - page angle detection and correction
//! - multi-engine OCR orchestration with fallback and merging
//! - order-number extraction from recognized text
//! - batch processing with pre-rename backups

pub mod angle;
pub mod backup;
pub mod batch;
pub mod error;
pub mod extract;
pub mod models;
pub mod ocr;
pub mod pdf;

pub use angle::{AngleCorrection, AngleCorrector};
pub use backup::{BackupManager, BackupRecord};
pub use batch::{BatchProcessor, CancelFlag};
pub use error::{RenordError, Result};
pub use extract::{ExtractedOrderNumber, OrderNumberExtractor};
pub use models::config::RenordConfig;
pub use models::document::{BatchReport, DocumentOutcome, DocumentStatus, NoMatchPolicy};
pub use ocr::{
    EngineOrchestrator, EngineRegistry, MergedResult, OcrCandidate, OcrEngineAdapter, OcrSpan,
    register_local_engines,
};
pub use pdf::{PageImage, PageRasterizer, PdfRasterizer, RasterizerFactory};
