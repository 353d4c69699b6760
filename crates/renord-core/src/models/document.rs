//! Per-document state machine and batch reporting types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backup::BackupRecord;
use crate::extract::ExtractedOrderNumber;

/// Processing status of a single document.
///
/// `Succeeded`, `Failed` and `Skipped` are terminal; a document never leaves
/// a terminal state within a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Skipped,
}

impl DocumentStatus {
    /// Whether this status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Policy applied when no order number is found in a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchPolicy {
    /// Leave the original unchanged and mark the document Skipped.
    #[default]
    Skip,
    /// Mark the document Failed.
    Fail,
}

/// Events that drive a document through its states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A worker picked the document up.
    Dispatched,
    /// An order number was extracted and the rename completed.
    Renamed,
    /// No pattern matched on any scanned page.
    NoMatch,
    /// An unrecoverable error occurred.
    Fatal,
    /// The batch was cancelled before or during processing.
    Cancelled,
}

/// Pure transition function for the document state machine.
///
/// Terminal states absorb every event. Unexpected events on non-terminal
/// states leave the state unchanged.
pub fn next_status(
    current: DocumentStatus,
    event: &PipelineEvent,
    policy: NoMatchPolicy,
) -> DocumentStatus {
    if current.is_terminal() {
        return current;
    }

    match (current, event) {
        (DocumentStatus::Pending, PipelineEvent::Dispatched) => DocumentStatus::Processing,
        (DocumentStatus::Pending, PipelineEvent::Cancelled) => DocumentStatus::Skipped,
        (DocumentStatus::Processing, PipelineEvent::Renamed) => DocumentStatus::Succeeded,
        (DocumentStatus::Processing, PipelineEvent::NoMatch) => match policy {
            NoMatchPolicy::Skip => DocumentStatus::Skipped,
            NoMatchPolicy::Fail => DocumentStatus::Failed,
        },
        (_, PipelineEvent::Fatal) => DocumentStatus::Failed,
        (DocumentStatus::Processing, PipelineEvent::Cancelled) => DocumentStatus::Failed,
        (current, _) => current,
    }
}

/// One input file tracked through the batch.
///
/// Owned exclusively by the batch processor for the duration of a run.
#[derive(Debug, Clone)]
pub struct Document {
    /// Position in the submission order.
    pub id: usize,
    /// Source file path.
    pub path: PathBuf,
    /// Pages reported by the rasterizer (0 until opened).
    pub page_count: u32,
    /// Current processing status.
    pub status: DocumentStatus,
    /// Extracted order number, once found.
    pub order_number: Option<ExtractedOrderNumber>,
    /// Path the file was renamed to, once succeeded.
    pub renamed_to: Option<PathBuf>,
    /// Backup record, once a backup was taken and verified.
    pub backup: Option<BackupRecord>,
    /// Error detail for Failed (or cancelled-Skipped) documents.
    pub error: Option<String>,
    /// Number of pages actually scanned.
    pub pages_scanned: u32,
}

impl Document {
    /// Create a pending document.
    pub fn new(id: usize, path: PathBuf) -> Self {
        Self {
            id,
            path,
            page_count: 0,
            status: DocumentStatus::Pending,
            order_number: None,
            renamed_to: None,
            backup: None,
            error: None,
            pages_scanned: 0,
        }
    }

    /// Apply an event to this document's status.
    pub fn apply(&mut self, event: PipelineEvent, policy: NoMatchPolicy) {
        self.status = next_status(self.status, &event, policy);
    }
}

/// Serializable outcome row for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    /// Submission-order id.
    pub document_id: usize,
    /// Original file path.
    pub source_path: PathBuf,
    /// Terminal status.
    pub status: DocumentStatus,
    /// Extracted order number (normalized), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    /// Path after rename, if renamed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renamed_to: Option<PathBuf>,
    /// Backup copy location, if a backup was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Error detail, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Pages scanned before the pipeline stopped.
    pub pages_scanned: u32,
    /// Wall-clock time spent on this document.
    pub processing_time_ms: u64,
}

impl DocumentOutcome {
    /// Build an outcome row from a finished document.
    pub fn from_document(doc: &Document, processing_time_ms: u64) -> Self {
        Self {
            document_id: doc.id,
            source_path: doc.path.clone(),
            status: doc.status,
            order_number: doc.order_number.as_ref().map(|o| o.text.clone()),
            renamed_to: doc.renamed_to.clone(),
            backup_path: doc.backup.as_ref().map(|b| b.backup_path.clone()),
            error: doc.error.clone(),
            pages_scanned: doc.pages_scanned,
            processing_time_ms,
        }
    }
}

/// Final report for one batch run, in original submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Per-document outcomes, ordered by submission.
    pub outcomes: Vec<DocumentOutcome>,
    /// Total batch wall-clock time.
    pub elapsed_ms: u64,
    /// Whether the batch was cancelled before completion.
    pub cancelled: bool,
}

impl BatchReport {
    /// Count of documents with the given status.
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut status = DocumentStatus::Pending;
        status = next_status(status, &PipelineEvent::Dispatched, NoMatchPolicy::Skip);
        assert_eq!(status, DocumentStatus::Processing);
        status = next_status(status, &PipelineEvent::Renamed, NoMatchPolicy::Skip);
        assert_eq!(status, DocumentStatus::Succeeded);
    }

    #[test]
    fn test_no_match_respects_policy() {
        let processing = DocumentStatus::Processing;
        assert_eq!(
            next_status(processing, &PipelineEvent::NoMatch, NoMatchPolicy::Skip),
            DocumentStatus::Skipped
        );
        assert_eq!(
            next_status(processing, &PipelineEvent::NoMatch, NoMatchPolicy::Fail),
            DocumentStatus::Failed
        );
    }

    #[test]
    fn test_terminal_states_absorb_events() {
        for terminal in [
            DocumentStatus::Succeeded,
            DocumentStatus::Failed,
            DocumentStatus::Skipped,
        ] {
            for event in [
                PipelineEvent::Dispatched,
                PipelineEvent::Renamed,
                PipelineEvent::NoMatch,
                PipelineEvent::Fatal,
                PipelineEvent::Cancelled,
            ] {
                assert_eq!(next_status(terminal, &event, NoMatchPolicy::Skip), terminal);
            }
        }
    }

    #[test]
    fn test_cancellation_before_dispatch_skips() {
        assert_eq!(
            next_status(DocumentStatus::Pending, &PipelineEvent::Cancelled, NoMatchPolicy::Skip),
            DocumentStatus::Skipped
        );
    }

    #[test]
    fn test_fatal_from_any_active_state() {
        assert_eq!(
            next_status(DocumentStatus::Pending, &PipelineEvent::Fatal, NoMatchPolicy::Skip),
            DocumentStatus::Failed
        );
        assert_eq!(
            next_status(DocumentStatus::Processing, &PipelineEvent::Fatal, NoMatchPolicy::Skip),
            DocumentStatus::Failed
        );
    }
}
