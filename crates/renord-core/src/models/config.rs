//! Configuration structures for the rename pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::document::NoMatchPolicy;

/// Main configuration for the renord pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenordConfig {
    /// Engine orchestration configuration.
    pub orchestrator: OrchestratorConfig,

    /// PDF rasterization configuration.
    pub raster: RasterConfig,

    /// Order-number extraction configuration.
    pub extraction: ExtractionConfig,

    /// Batch processing configuration.
    pub batch: BatchConfig,
}

/// Engine orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Engine ids in priority order (earlier = higher merge weight).
    pub engine_priority: Vec<String>,

    /// Time budget per engine per page, in milliseconds.
    pub per_page_timeout_ms: u64,

    /// Explicit per-position merge weights. When absent, position `i`
    /// weighs `1 / (i + 1)`.
    pub engine_weights: Option<Vec<f32>>,

    /// Drop candidates below this recognition confidence before merging.
    pub min_candidate_confidence: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine_priority: vec!["local".to_string(), "local-fast".to_string()],
            per_page_timeout_ms: 30_000,
            engine_weights: None,
            min_candidate_confidence: 0.3,
        }
    }
}

impl OrchestratorConfig {
    /// Merge weight for an engine at the given priority position.
    pub fn weight_for(&self, position: usize) -> f32 {
        self.engine_weights
            .as_ref()
            .and_then(|w| w.get(position).copied())
            .unwrap_or(1.0 / (position as f32 + 1.0))
    }
}

/// PDF rasterization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// DPI for rendering PDF pages to images.
    pub render_dpi: u32,

    /// Maximum pages to scan per document (0 = unlimited).
    pub max_pages: usize,

    /// Try the embedded text layer before falling back to OCR.
    pub prefer_embedded_text: bool,

    /// Minimum embedded-text length to consider the layer usable.
    pub min_text_length: usize,

    /// Maximum image dimension (longer side) for processing.
    pub max_image_size: u32,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            render_dpi: 200,
            max_pages: 10,
            prefer_embedded_text: true,
            min_text_length: 50,
            max_image_size: 2048,
        }
    }
}

/// Order-number extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Reject bare tokens that look like courier tracking numbers.
    pub exclude_courier_numbers: bool,

    /// Minimum digits a bare token must contain.
    pub min_digits: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            exclude_courier_numbers: true,
            min_digits: 1,
        }
    }
}

/// Batch processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of concurrent document workers.
    pub max_workers: usize,

    /// Policy when no order number is found in a document.
    pub on_no_match: NoMatchPolicy,

    /// Root of the dated backup area.
    pub backup_dir: PathBuf,

    /// Skip the backup step entirely (renames proceed unprotected).
    pub backup_enabled: bool,

    /// Grace period for in-flight documents after cancellation, in
    /// milliseconds.
    pub cancel_grace_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            on_no_match: NoMatchPolicy::Skip,
            backup_dir: PathBuf::from("backup"),
            backup_enabled: true,
            cancel_grace_ms: 10_000,
        }
    }
}

impl RenordConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_decay_by_position() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.weight_for(0), 1.0);
        assert_eq!(config.weight_for(1), 0.5);
        assert!(config.weight_for(0) > config.weight_for(1));
    }

    #[test]
    fn test_explicit_weights_override_default() {
        let config = OrchestratorConfig {
            engine_weights: Some(vec![0.9, 0.8]),
            ..Default::default()
        };
        assert_eq!(config.weight_for(0), 0.9);
        assert_eq!(config.weight_for(1), 0.8);
        // Positions past the explicit list fall back to the decay rule.
        assert_eq!(config.weight_for(2), 1.0 / 3.0);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = RenordConfig::default();
        config.batch.max_workers = 8;
        config.save(&path).unwrap();

        let loaded = RenordConfig::from_file(&path).unwrap();
        assert_eq!(loaded.batch.max_workers, 8);
        assert_eq!(loaded.orchestrator.engine_priority, config.orchestrator.engine_priority);
    }
}
