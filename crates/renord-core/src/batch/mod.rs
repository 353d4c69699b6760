//! Batch orchestration: a bounded worker pool drives each document through
//! rasterize → angle-correct → recognize → extract → backup → rename.
//!
//! One document's failure never aborts another; every worker owns exactly
//! one document's pipeline at a time, and the only shared state is the
//! read-only configuration, the engine registry and a progress counter.
//! The final report lists outcomes in original submission order no matter
//! how completion interleaved.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::DynamicImage;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::angle::{AngleCorrector, rotate_coarse};
use crate::backup::{BackupManager, disambiguate};
use crate::error::{EngineError, RenordError};
use crate::extract::{ExtractedOrderNumber, OrderNumberExtractor};
use crate::models::config::RenordConfig;
use crate::models::document::{
    BatchReport, Document, DocumentOutcome, DocumentStatus, NoMatchPolicy, PipelineEvent,
};
use crate::ocr::{EngineOrchestrator, EngineRegistry, MergedResult};
use crate::pdf::{PdfRasterizerFactory, RasterizerFactory};

/// Engine id reported for matches found in the embedded text layer.
const EMBEDDED_TEXT_ENGINE: &str = "embedded-text";

/// Cloneable batch-level cancellation signal.
#[derive(Clone)]
pub struct CancelFlag {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Sender kept alive by self; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Drives a set of documents through the full pipeline.
pub struct BatchProcessor {
    context: PipelineContext,
    progress: Arc<AtomicUsize>,
}

/// Everything a worker needs, cheap to clone into spawned tasks.
#[derive(Clone)]
struct PipelineContext {
    config: Arc<RenordConfig>,
    orchestrator: Arc<EngineOrchestrator>,
    corrector: Arc<AngleCorrector>,
    extractor: Arc<OrderNumberExtractor>,
    backup: Arc<BackupManager>,
    rasterizer: Arc<dyn RasterizerFactory>,
    cancel: CancelFlag,
}

enum Slot {
    Done(DocumentOutcome),
    Running {
        id: usize,
        path: PathBuf,
        handle: JoinHandle<DocumentOutcome>,
    },
}

/// How a single document's pipeline ended.
enum PipelineOutcome {
    Renamed,
    NoMatch,
    Cancelled,
}

impl BatchProcessor {
    /// Build a processor from configuration and an engine registry.
    pub fn new(config: RenordConfig, registry: EngineRegistry) -> Self {
        let orchestrator = EngineOrchestrator::new(registry, config.orchestrator.clone());
        let extractor = OrderNumberExtractor::new(config.extraction.clone());
        let backup = BackupManager::new(config.batch.backup_dir.clone());

        Self {
            context: PipelineContext {
                orchestrator: Arc::new(orchestrator),
                corrector: Arc::new(AngleCorrector::new()),
                extractor: Arc::new(extractor),
                backup: Arc::new(backup),
                rasterizer: Arc::new(PdfRasterizerFactory),
                cancel: CancelFlag::new(),
                config: Arc::new(config),
            },
            progress: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Substitute the rasterizer factory (used by tests).
    pub fn with_rasterizer(mut self, factory: Arc<dyn RasterizerFactory>) -> Self {
        self.context.rasterizer = factory;
        self
    }

    /// Handle for signalling batch cancellation.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.context.cancel.clone()
    }

    /// Number of documents that have reached a terminal state so far.
    pub fn completed_documents(&self) -> usize {
        self.progress.load(Ordering::Relaxed)
    }

    /// Process all inputs and report per-document outcomes in submission
    /// order.
    pub async fn run(&self, inputs: Vec<PathBuf>) -> BatchReport {
        let start = Instant::now();
        let total = inputs.len();
        let workers = self.context.config.batch.max_workers.max(1);
        let policy = self.context.config.batch.on_no_match;

        info!("Starting batch of {} documents with {} workers", total, workers);

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut slots: Vec<Slot> = Vec::with_capacity(total);

        for (id, path) in inputs.into_iter().enumerate() {
            if self.context.cancel.is_cancelled() {
                slots.push(Slot::Done(cancelled_before_dispatch(id, path, policy)));
                continue;
            }

            // Dispatch only when a worker is free; a cancellation that
            // arrives while waiting stops this document from starting.
            let permit = tokio::select! {
                acquired = semaphore.clone().acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => {
                        slots.push(Slot::Done(cancelled_before_dispatch(id, path, policy)));
                        continue;
                    }
                },
                _ = self.context.cancel.cancelled() => {
                    slots.push(Slot::Done(cancelled_before_dispatch(id, path, policy)));
                    continue;
                }
            };

            let context = self.context.clone();
            let progress = self.progress.clone();
            let task_path = path.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let doc_start = Instant::now();
                let document = context.process_document(id, task_path).await;
                progress.fetch_add(1, Ordering::Relaxed);
                DocumentOutcome::from_document(&document, doc_start.elapsed().as_millis() as u64)
            });

            slots.push(Slot::Running { id, path, handle });
        }

        // Collect in submission order. After cancellation, in-flight
        // documents share one grace deadline before being aborted.
        let grace = Duration::from_millis(self.context.config.batch.cancel_grace_ms);
        let mut deadline: Option<tokio::time::Instant> = None;
        let mut outcomes = Vec::with_capacity(total);

        for slot in slots {
            match slot {
                Slot::Done(outcome) => outcomes.push(outcome),
                Slot::Running {
                    id,
                    path,
                    mut handle,
                } => {
                    if deadline.is_none() && self.context.cancel.is_cancelled() {
                        deadline = Some(tokio::time::Instant::now() + grace);
                    }

                    let joined = loop {
                        match deadline {
                            Some(at) => match tokio::time::timeout_at(at, &mut handle).await {
                                Ok(joined) => break Some(joined),
                                Err(_) => {
                                    handle.abort();
                                    break None;
                                }
                            },
                            None => {
                                tokio::select! {
                                    joined = &mut handle => break Some(joined),
                                    _ = self.context.cancel.cancelled() => {
                                        deadline =
                                            Some(tokio::time::Instant::now() + grace);
                                    }
                                }
                            }
                        }
                    };

                    let outcome = match joined {
                        Some(Ok(outcome)) => outcome,
                        Some(Err(join_error)) => {
                            warn!("Worker for document {} died: {}", id, join_error);
                            failed_outcome(id, path, format!("worker failed: {}", join_error))
                        }
                        None => {
                            warn!("Document {} exceeded the cancellation grace period", id);
                            failed_outcome(id, path, "cancelled during processing".to_string())
                        }
                    };
                    outcomes.push(outcome);
                }
            }
        }

        let report = BatchReport {
            outcomes,
            elapsed_ms: start.elapsed().as_millis() as u64,
            cancelled: self.context.cancel.is_cancelled(),
        };

        info!(
            "Batch complete in {}ms: {} succeeded, {} skipped, {} failed",
            report.elapsed_ms,
            report.count(DocumentStatus::Succeeded),
            report.count(DocumentStatus::Skipped),
            report.count(DocumentStatus::Failed),
        );

        report
    }
}

fn cancelled_before_dispatch(id: usize, path: PathBuf, policy: NoMatchPolicy) -> DocumentOutcome {
    let mut document = Document::new(id, path);
    document.apply(PipelineEvent::Cancelled, policy);
    document.error = Some("cancelled before dispatch".to_string());
    DocumentOutcome::from_document(&document, 0)
}

fn failed_outcome(id: usize, path: PathBuf, error: String) -> DocumentOutcome {
    let mut document = Document::new(id, path);
    document.status = DocumentStatus::Failed;
    document.error = Some(error);
    DocumentOutcome::from_document(&document, 0)
}

impl PipelineContext {
    /// Run one document to a terminal state. Never panics or escapes an
    /// error: everything is captured on the document.
    async fn process_document(&self, id: usize, path: PathBuf) -> Document {
        let policy = self.config.batch.on_no_match;
        let mut document = Document::new(id, path);
        document.apply(PipelineEvent::Dispatched, policy);

        match self.run_pipeline(&mut document).await {
            Ok(PipelineOutcome::Renamed) => {
                document.apply(PipelineEvent::Renamed, policy);
            }
            Ok(PipelineOutcome::NoMatch) => {
                document.apply(PipelineEvent::NoMatch, policy);
                if policy == NoMatchPolicy::Fail {
                    document.error = Some("no order number found".to_string());
                }
                debug!("No order number found in {}", document.path.display());
            }
            Ok(PipelineOutcome::Cancelled) => {
                document.apply(PipelineEvent::Cancelled, policy);
                document.error = Some("cancelled".to_string());
            }
            Err(error) => {
                warn!("Document {} failed: {}", document.path.display(), error);
                document.error = Some(error.to_string());
                document.apply(PipelineEvent::Fatal, policy);
            }
        }

        document
    }

    async fn run_pipeline(&self, document: &mut Document) -> Result<PipelineOutcome, RenordError> {
        let rasterizer = self.rasterizer.open(&document.path)?;
        document.page_count = rasterizer.page_count();

        // Fast path: a usable embedded text layer spares the OCR pass
        // entirely.
        if self.config.raster.prefer_embedded_text {
            if let Ok(text) = rasterizer.embedded_text() {
                if text.trim().len() >= self.config.raster.min_text_length {
                    let merged = MergedResult::from_plain_text(text, EMBEDDED_TEXT_ENGINE, 0);
                    if let Some(order) = self.extractor.extract(&merged) {
                        debug!(
                            "Embedded text layer matched '{}' in {}",
                            order.text,
                            document.path.display()
                        );
                        return self.finish_rename(document, order).await;
                    }
                }
            }
        }

        let page_cap = match self.config.raster.max_pages {
            0 => document.page_count,
            cap => (cap as u32).min(document.page_count),
        };

        let mut ocr_pages = 0u32;
        let mut engine_failed_pages = 0u32;
        let mut last_error: Option<RenordError> = None;

        for page_index in 0..page_cap {
            if self.cancel.is_cancelled() {
                return Ok(PipelineOutcome::Cancelled);
            }

            let page = match rasterizer.render(page_index, self.config.raster.render_dpi) {
                Ok(page) => page,
                Err(error) => {
                    warn!(
                        "Could not rasterize page {} of {}: {}",
                        page_index,
                        document.path.display(),
                        error
                    );
                    last_error = Some(error.into());
                    continue;
                }
            };

            document.pages_scanned += 1;
            ocr_pages += 1;

            let (corrected, correction) = self.corrector.correct(&page.image);
            debug!(
                "Page {} of {}: coarse {}°, fine {:.1}° (confidence {:.2})",
                page_index,
                document.path.display(),
                correction.coarse,
                correction.fine,
                correction.confidence
            );

            // The estimators cannot tell a page from its 180° flip, so a
            // miss on the corrected page earns one retry upside down.
            match self.scan_orientations(&corrected, page_index).await {
                Ok(Some(order)) => return self.finish_rename(document, order).await,
                Ok(None) => {}
                Err(EngineError::NoEngineAvailable) => {
                    engine_failed_pages += 1;
                    last_error = Some(EngineError::NoEngineAvailable.into());
                }
                Err(error) => {
                    last_error = Some(error.into());
                }
            }
        }

        if ocr_pages > 0 && engine_failed_pages == ocr_pages {
            return Err(EngineError::NoEngineAvailable.into());
        }
        if ocr_pages == 0 {
            if let Some(error) = last_error {
                return Err(error);
            }
        }

        Ok(PipelineOutcome::NoMatch)
    }

    /// Recognize and extract on the corrected page, then once more on its
    /// 180° flip.
    async fn scan_orientations(
        &self,
        corrected: &DynamicImage,
        page_index: u32,
    ) -> Result<Option<ExtractedOrderNumber>, EngineError> {
        let merged = self.orchestrator.recognize(corrected, page_index).await?;
        if let Some(order) = self.extractor.extract(&merged) {
            return Ok(Some(order));
        }

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let flipped = rotate_coarse(corrected, 180);
        let merged = self.orchestrator.recognize(&flipped, page_index).await?;
        Ok(self.extractor.extract(&merged))
    }

    /// Back up the original, then rename it after the extracted number.
    async fn finish_rename(
        &self,
        document: &mut Document,
        order: ExtractedOrderNumber,
    ) -> Result<PipelineOutcome, RenordError> {
        // A cancellation landing before the backup is verified must leave
        // the file untouched.
        if self.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }

        if self.config.batch.backup_enabled {
            let record = self.backup.backup(&document.path)?;
            document.backup = Some(record);
        }

        let parent = document.path.parent().unwrap_or_else(|| Path::new("."));
        let extension = document
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("pdf");
        let desired = parent.join(format!("{}.{}", order.text, extension));

        let target = if desired == document.path {
            desired
        } else {
            disambiguate(&desired)
        };

        if target != document.path {
            std::fs::rename(&document.path, &target)?;
        }

        info!(
            "Renamed {} -> {} (pattern {}, confidence {:.2})",
            document.path.display(),
            target.display(),
            order.pattern_id,
            order.confidence
        );

        document.order_number = Some(order);
        document.renamed_to = Some(target);
        Ok(PipelineOutcome::Renamed)
    }
}
