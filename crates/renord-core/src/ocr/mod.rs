//! OCR candidate types and the multi-engine orchestration layer.

mod engine;
mod orchestrator;

pub use engine::{EngineRegistry, OcrEngineAdapter, PureOcrAdapter, register_local_engines};
pub use orchestrator::EngineOrchestrator;

use serde::{Deserialize, Serialize};

/// Raw engine output: one recognized text span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSpan {
    /// Recognized text content.
    pub text: String,

    /// Bounding box coordinates (x1, y1, x2, y2, x3, y3, x4, y4) for
    /// quadrilateral regions.
    pub bbox: [f32; 8],

    /// Recognition confidence score (0.0 - 1.0).
    pub confidence: f32,
}

/// One recognized text span attributed to its source engine and page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrCandidate {
    /// Recognized text content.
    pub text: String,

    /// Recognition confidence score (0.0 - 1.0).
    pub confidence: f32,

    /// Identifier of the engine that produced this span.
    pub engine: String,

    /// Bounding box of the span within the page.
    pub bbox: [f32; 8],

    /// Zero-based page index.
    pub page_index: u32,
}

/// A deduplicated candidate group with its cross-engine combined score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// Representative candidate: the highest-confidence instance of the
    /// group (ties broken by lexicographically earliest engine id).
    pub candidate: OcrCandidate,

    /// Priority-weighted average of per-engine confidences.
    pub combined_score: f32,

    /// Engines that produced this text, sorted by id.
    pub engines: Vec<String>,
}

/// Ranked, deduplicated union of candidates across all engines for one page.
///
/// Ordered by combined score descending. No two retained candidates share
/// the same normalized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    /// Zero-based page index the candidates came from.
    pub page_index: u32,

    /// Candidates, highest combined score first.
    pub candidates: Vec<RankedCandidate>,
}

impl MergedResult {
    /// Create an empty result for a page.
    pub fn empty(page_index: u32) -> Self {
        Self {
            page_index,
            candidates: Vec::new(),
        }
    }

    /// Whether any candidate was retained.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Wrap pre-extracted plain text (e.g. an embedded PDF text layer) as a
    /// single full-confidence candidate.
    pub fn from_plain_text(text: String, engine: &str, page_index: u32) -> Self {
        Self {
            page_index,
            candidates: vec![RankedCandidate {
                candidate: OcrCandidate {
                    text,
                    confidence: 1.0,
                    engine: engine.to_string(),
                    bbox: [0.0; 8],
                    page_index,
                },
                combined_score: 1.0,
                engines: vec![engine.to_string()],
            }],
        }
    }
}

/// Normalize text for deduplication: case-folded, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_text("  SO 2024\t001 "), "so 2024 001");
        assert_eq!(normalize_text("abc"), normalize_text("ABC"));
    }

    #[test]
    fn test_from_plain_text_is_single_full_confidence_candidate() {
        let merged = MergedResult::from_plain_text("单号: 1403-1".to_string(), "embedded-text", 0);
        assert_eq!(merged.candidates.len(), 1);
        assert_eq!(merged.candidates[0].combined_score, 1.0);
        assert_eq!(merged.candidates[0].candidate.engine, "embedded-text");
    }
}
