//! Multi-engine orchestration: concurrent recognition under a time budget,
//! followed by a deterministic cross-engine merge.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::models::config::OrchestratorConfig;

use super::{EngineRegistry, MergedResult, OcrCandidate, OcrEngineAdapter, RankedCandidate,
            normalize_text};

/// Runs the configured engines over a page and merges their candidate sets.
pub struct EngineOrchestrator {
    registry: EngineRegistry,
    config: OrchestratorConfig,
}

impl EngineOrchestrator {
    /// Create an orchestrator over a registry and configuration.
    pub fn new(registry: EngineRegistry, config: OrchestratorConfig) -> Self {
        Self { registry, config }
    }

    /// Recognize text on a corrected page bitmap.
    ///
    /// All engines in the priority list run concurrently, each under the
    /// per-page time budget. Engines that time out or error are dropped
    /// from the vote, not retried. The merge runs only once every engine
    /// has completed or timed out. Errors with
    /// [`EngineError::NoEngineAvailable`] when nothing completes.
    pub async fn recognize(
        &self,
        image: &DynamicImage,
        page_index: u32,
    ) -> Result<MergedResult, EngineError> {
        let engines: Vec<(usize, Arc<dyn OcrEngineAdapter>)> = self
            .config
            .engine_priority
            .iter()
            .enumerate()
            .filter_map(|(position, id)| match self.registry.get(id) {
                Some(engine) => Some((position, engine)),
                None => {
                    warn!("Engine '{}' is not registered, skipping", id);
                    None
                }
            })
            .collect();

        if engines.is_empty() {
            return Err(EngineError::NoEngineAvailable);
        }

        let budget = Duration::from_millis(self.config.per_page_timeout_ms);

        let runs = engines.iter().map(|(position, engine)| {
            let engine = engine.clone();
            let position = *position;
            async move {
                match tokio::time::timeout(budget, engine.run(image)).await {
                    Ok(Ok(spans)) => {
                        debug!(
                            "Engine '{}' returned {} spans for page {}",
                            engine.id(),
                            spans.len(),
                            page_index
                        );
                        Some((position, engine.id().to_string(), spans))
                    }
                    Ok(Err(e)) => {
                        warn!("Engine '{}' failed on page {}: {}", engine.id(), page_index, e);
                        None
                    }
                    Err(_) => {
                        warn!(
                            "Engine '{}' timed out after {}ms on page {}",
                            engine.id(),
                            self.config.per_page_timeout_ms,
                            page_index
                        );
                        None
                    }
                }
            }
        });

        let outputs: Vec<(usize, String, Vec<super::OcrSpan>)> =
            futures::future::join_all(runs).await.into_iter().flatten().collect();

        if outputs.is_empty() {
            return Err(EngineError::NoEngineAvailable);
        }

        Ok(self.merge(outputs, page_index))
    }

    /// Merge per-engine span sets into a ranked, deduplicated candidate
    /// list. Deterministic: identical inputs always produce identical
    /// ordering.
    fn merge(
        &self,
        outputs: Vec<(usize, String, Vec<super::OcrSpan>)>,
        page_index: u32,
    ) -> MergedResult {
        struct Group {
            // Best span per engine: (priority position, candidate).
            members: BTreeMap<String, (usize, OcrCandidate)>,
        }

        let mut groups: BTreeMap<String, Group> = BTreeMap::new();

        for (position, engine_id, spans) in outputs {
            for span in spans {
                if span.confidence < self.config.min_candidate_confidence {
                    continue;
                }
                let key = normalize_text(&span.text);
                if key.is_empty() {
                    continue;
                }

                let candidate = OcrCandidate {
                    text: span.text,
                    confidence: span.confidence,
                    engine: engine_id.clone(),
                    bbox: span.bbox,
                    page_index,
                };

                let group = groups.entry(key).or_insert_with(|| Group {
                    members: BTreeMap::new(),
                });

                // Keep only the engine's best span for this text.
                match group.members.get(&engine_id) {
                    Some((_, existing)) if existing.confidence >= candidate.confidence => {}
                    _ => {
                        group.members.insert(engine_id.clone(), (position, candidate));
                    }
                }
            }
        }

        let mut candidates: Vec<(String, RankedCandidate)> = groups
            .into_iter()
            .map(|(key, group)| {
                let mut weight_sum = 0.0f32;
                let mut score_sum = 0.0f32;
                let mut engines: Vec<String> = Vec::with_capacity(group.members.len());

                for (engine_id, (position, candidate)) in &group.members {
                    let weight = self.config.weight_for(*position);
                    weight_sum += weight;
                    score_sum += weight * candidate.confidence;
                    engines.push(engine_id.clone());
                }

                // Representative: highest confidence; ties go to the
                // lexicographically earliest engine id (BTreeMap iteration
                // order, first strict maximum wins).
                let mut representative: Option<&OcrCandidate> = None;
                for (_, candidate) in group.members.values() {
                    match representative {
                        Some(best) if best.confidence >= candidate.confidence => {}
                        _ => representative = Some(candidate),
                    }
                }
                let representative = representative
                    .cloned()
                    .unwrap_or_else(|| unreachable!("group has at least one member"));

                (
                    key,
                    RankedCandidate {
                        candidate: representative,
                        combined_score: score_sum / weight_sum.max(f32::EPSILON),
                        engines,
                    },
                )
            })
            .collect();

        candidates.sort_by(|(key_a, a), (key_b, b)| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| a.candidate.engine.cmp(&b.candidate.engine))
                .then_with(|| key_a.cmp(key_b))
        });

        MergedResult {
            page_index,
            candidates: candidates.into_iter().map(|(_, c)| c).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrSpan;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct StaticEngine {
        id: String,
        spans: Vec<OcrSpan>,
        delay_ms: Option<u64>,
        fail: bool,
    }

    impl StaticEngine {
        fn new(id: &str, spans: Vec<(&str, f32)>) -> Self {
            Self {
                id: id.to_string(),
                spans: spans
                    .into_iter()
                    .map(|(text, confidence)| OcrSpan {
                        text: text.to_string(),
                        bbox: [0.0; 8],
                        confidence,
                    })
                    .collect(),
                delay_ms: None,
                fail: false,
            }
        }

        fn delayed(mut self, ms: u64) -> Self {
            self.delay_ms = Some(ms);
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl OcrEngineAdapter for StaticEngine {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, _image: &DynamicImage) -> Result<Vec<OcrSpan>, EngineError> {
            if let Some(ms) = self.delay_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if self.fail {
                return Err(EngineError::Unavailable("down for test".to_string()));
            }
            Ok(self.spans.clone())
        }
    }

    fn orchestrator(engines: Vec<StaticEngine>, priority: &[&str]) -> EngineOrchestrator {
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.register(Arc::new(engine));
        }
        let config = OrchestratorConfig {
            engine_priority: priority.iter().map(|s| s.to_string()).collect(),
            per_page_timeout_ms: 100,
            engine_weights: None,
            min_candidate_confidence: 0.3,
        };
        EngineOrchestrator::new(registry, config)
    }

    fn blank() -> DynamicImage {
        DynamicImage::new_luma8(8, 8)
    }

    #[tokio::test]
    async fn test_merge_is_deterministic() {
        let make = || {
            orchestrator(
                vec![
                    StaticEngine::new("alpha", vec![("SO-1", 0.8), ("票据", 0.6)]),
                    StaticEngine::new("beta", vec![("SO-1", 0.7), ("其它", 0.6)]),
                ],
                &["alpha", "beta"],
            )
        };

        let first = make().recognize(&blank(), 0).await.unwrap();
        let second = make().recognize(&blank(), 0).await.unwrap();

        let texts = |m: &MergedResult| {
            m.candidates
                .iter()
                .map(|c| c.candidate.text.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(texts(&first), texts(&second));
    }

    #[tokio::test]
    async fn test_duplicate_text_reduces_to_single_candidate() {
        let orch = orchestrator(
            vec![
                StaticEngine::new("alpha", vec![("SO-2024", 0.9)]),
                StaticEngine::new("beta", vec![("so-2024", 0.5)]),
            ],
            &["alpha", "beta"],
        );

        let merged = orch.recognize(&blank(), 0).await.unwrap();
        assert_eq!(merged.candidates.len(), 1);

        let ranked = &merged.candidates[0];
        // Representative keeps the higher-confidence instance.
        assert_eq!(ranked.candidate.engine, "alpha");
        assert_eq!(ranked.candidate.text, "SO-2024");
        assert_eq!(ranked.engines, vec!["alpha".to_string(), "beta".to_string()]);

        // Weighted average: (1.0 * 0.9 + 0.5 * 0.5) / 1.5.
        assert!((ranked.combined_score - 1.15 / 1.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_low_confidence_spans_are_dropped() {
        let orch = orchestrator(
            vec![StaticEngine::new("alpha", vec![("noise", 0.1), ("real", 0.8)])],
            &["alpha"],
        );
        let merged = orch.recognize(&blank(), 0).await.unwrap();
        assert_eq!(merged.candidates.len(), 1);
        assert_eq!(merged.candidates[0].candidate.text, "real");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_engine_is_skipped_not_fatal() {
        let orch = orchestrator(
            vec![
                StaticEngine::new("slow", vec![("never", 0.9)]).delayed(5_000),
                StaticEngine::new("fast", vec![("seen", 0.8)]),
            ],
            &["slow", "fast"],
        );

        let merged = orch.recognize(&blank(), 0).await.unwrap();
        assert_eq!(merged.candidates.len(), 1);
        assert_eq!(merged.candidates[0].candidate.text, "seen");
    }

    #[tokio::test]
    async fn test_all_engines_failing_is_no_engine_available() {
        let orch = orchestrator(
            vec![
                StaticEngine::new("a", vec![("x", 0.9)]).failing(),
                StaticEngine::new("b", vec![("y", 0.9)]).failing(),
            ],
            &["a", "b"],
        );

        let result = orch.recognize(&blank(), 0).await;
        assert!(matches!(result, Err(EngineError::NoEngineAvailable)));
    }

    #[tokio::test]
    async fn test_unregistered_priority_entries_are_skipped() {
        let orch = orchestrator(
            vec![StaticEngine::new("real", vec![("hit", 0.8)])],
            &["ghost", "real"],
        );
        let merged = orch.recognize(&blank(), 0).await.unwrap();
        assert_eq!(merged.candidates[0].candidate.text, "hit");

        let empty = orchestrator(vec![], &["ghost"]);
        assert!(matches!(
            empty.recognize(&blank(), 0).await,
            Err(EngineError::NoEngineAvailable)
        ));
    }

    #[tokio::test]
    async fn test_ordering_by_combined_score() {
        let orch = orchestrator(
            vec![StaticEngine::new(
                "alpha",
                vec![("weak", 0.4), ("strong", 0.95), ("middle", 0.7)],
            )],
            &["alpha"],
        );
        let merged = orch.recognize(&blank(), 0).await.unwrap();
        let texts: Vec<&str> = merged
            .candidates
            .iter()
            .map(|c| c.candidate.text.as_str())
            .collect();
        assert_eq!(texts, vec!["strong", "middle", "weak"]);
    }
}
