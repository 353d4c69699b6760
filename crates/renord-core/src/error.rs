//! Error types for the renord-core library.

use thiserror::Error;

/// Main error type for the renord library.
#[derive(Error, Debug)]
pub enum RenordError {
    /// PDF rasterization error.
    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    /// OCR engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Backup error.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to PDF page rasterization.
#[derive(Error, Debug)]
pub enum RasterError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page index requested.
    #[error("page index out of range: {0}")]
    PageOutOfRange(u32),

    /// Failed to extract embedded text.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// No usable page bitmap could be produced.
    #[error("failed to rasterize page {page}: {reason}")]
    Render { page: u32, reason: String },
}

/// Errors raised by OCR engine adapters and their orchestration.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine cannot serve requests (missing models, backend down).
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine exceeded its per-page time budget.
    #[error("engine '{engine}' timed out after {budget_ms}ms")]
    Timeout { engine: String, budget_ms: u64 },

    /// Recognition failed on this input.
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// Every configured engine failed or timed out.
    #[error("no engine produced a result")]
    NoEngineAvailable,
}

/// Errors related to backing up originals before rename.
#[derive(Error, Debug)]
pub enum BackupError {
    /// The backup copy does not match the source.
    #[error("backup verification failed: source is {source_len} bytes, backup is {backup_len} bytes")]
    VerificationFailed { source_len: u64, backup_len: u64 },

    /// I/O failure while creating the backup.
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the renord library.
pub type Result<T> = std::result::Result<T, RenordError>;
