//! OCR engine adapter seam and the built-in pure-Rust engine.
//!
//! Engines are black-box capability providers: given a page bitmap they
//! return recognized text spans with confidences. New engines plug in by
//! implementing [`OcrEngineAdapter`] and registering under an id; the
//! orchestrator never knows what runs behind the trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use tracing::{debug, info};

use crate::error::EngineError;

use super::OcrSpan;

/// A black-box OCR capability provider.
#[async_trait]
pub trait OcrEngineAdapter: Send + Sync {
    /// Stable identifier used in priority configuration and merge weights.
    fn id(&self) -> &str;

    /// Recognize text spans in a page bitmap. Time budgets are enforced by
    /// the orchestrator, not the adapter.
    async fn run(&self, image: &DynamicImage) -> Result<Vec<OcrSpan>, EngineError>;
}

/// Registry of available engines, keyed by id.
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn OcrEngineAdapter>>,
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine. A later registration under the same id replaces
    /// the earlier one.
    pub fn register(&mut self, engine: Arc<dyn OcrEngineAdapter>) {
        debug!("Registered OCR engine '{}'", engine.id());
        self.engines.insert(engine.id().to_string(), engine);
    }

    /// Look up an engine by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn OcrEngineAdapter>> {
        self.engines.get(id).cloned()
    }

    /// Registered engine ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Adapter over the `pure-onnx-ocr` engine.
///
/// Inference is CPU-bound and synchronous, so each call runs on the
/// blocking pool. Several adapters may share one loaded model.
pub struct PureOcrAdapter {
    id: String,
    engine: Arc<pure_onnx_ocr::engine::OcrEngine>,
    /// Downscale the input's longer edge to this before recognition.
    /// Trades accuracy for speed.
    downscale_to: Option<u32>,
}

impl PureOcrAdapter {
    /// Load models from a directory and wrap them under the given id.
    pub fn from_dir(id: &str, model_dir: &Path) -> Result<Self, EngineError> {
        let det_path = model_dir.join("det.onnx");
        let rec_path = model_dir.join("rec.onnx");
        let dict_path = model_dir.join("dict.txt");

        let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
            .det_model_path(&det_path)
            .rec_model_path(&rec_path)
            .dictionary_path(&dict_path)
            .build()
            .map_err(|e| EngineError::Unavailable(format!("pure-onnx-ocr: {}", e)))?;

        info!("Loaded pure-onnx-ocr engine '{}' from {}", id, model_dir.display());

        Ok(Self {
            id: id.to_string(),
            engine: Arc::new(engine),
            downscale_to: None,
        })
    }

    /// Share an already-loaded model under a different id and input scale.
    pub fn with_shared_model(
        id: &str,
        engine: Arc<pure_onnx_ocr::engine::OcrEngine>,
        downscale_to: Option<u32>,
    ) -> Self {
        Self {
            id: id.to_string(),
            engine,
            downscale_to,
        }
    }

    /// The loaded model, for sharing between adapter variants.
    pub fn model(&self) -> Arc<pure_onnx_ocr::engine::OcrEngine> {
        self.engine.clone()
    }
}

#[async_trait]
impl OcrEngineAdapter for PureOcrAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, image: &DynamicImage) -> Result<Vec<OcrSpan>, EngineError> {
        let input = match self.downscale_to {
            Some(cap) if image.width().max(image.height()) > cap => {
                image.resize(cap, cap, image::imageops::FilterType::Triangle)
            }
            _ => image.clone(),
        };

        let engine = self.engine.clone();
        let results = tokio::task::spawn_blocking(move || engine.run_from_image(&input))
            .await
            .map_err(|e| EngineError::Recognition(format!("inference task failed: {}", e)))?
            .map_err(|e| EngineError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

        debug!("Engine '{}' returned {} text regions", self.id, results.len());

        Ok(results
            .iter()
            .map(|r| OcrSpan {
                text: r.text.replace("[UNK]", " "),
                bbox: polygon_to_bbox(&r.bounding_box),
                confidence: r.confidence,
            })
            .collect())
    }
}

/// Register the built-in local engine variants: `local` at full resolution
/// and `local-fast` on a downscaled input, sharing one loaded model.
pub fn register_local_engines(
    registry: &mut EngineRegistry,
    model_dir: &Path,
) -> Result<(), EngineError> {
    let full = PureOcrAdapter::from_dir("local", model_dir)?;
    let fast = PureOcrAdapter::with_shared_model("local-fast", full.model(), Some(960));

    registry.register(Arc::new(full));
    registry.register(Arc::new(fast));
    Ok(())
}

/// Convert a `Polygon<f64>` to the `[f32; 8]` bbox format: the first 4
/// exterior points as `[x1, y1, x2, y2, x3, y3, x4, y4]`.
fn polygon_to_bbox(polygon: &pure_onnx_ocr::Polygon<f64>) -> [f32; 8] {
    let mut bbox = [0.0f32; 8];
    for (i, coord) in polygon.exterior().coords().take(4).enumerate() {
        bbox[i * 2] = coord.x as f32;
        bbox[i * 2 + 1] = coord.y as f32;
    }
    bbox
}
