//! Order-number extraction from merged OCR results.

pub mod patterns;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::config::ExtractionConfig;
use crate::ocr::{MergedResult, OcrCandidate};

use patterns::{ORDER_GRAMMAR, ORDER_PATTERNS, looks_like_courier};

/// Characters that must never reach a filename component.
const FILENAME_ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// A successfully extracted order number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedOrderNumber {
    /// Normalized token, safe for use as a filename component.
    pub text: String,
    /// Token exactly as matched in the candidate text.
    pub raw: String,
    /// Identifier of the pattern that matched.
    pub pattern_id: String,
    /// The candidate the match came from.
    pub candidate: OcrCandidate,
    /// Combined confidence of the originating candidate.
    pub confidence: f32,
}

/// Scans merged OCR candidates for the order number.
#[derive(Debug, Clone, Default)]
pub struct OrderNumberExtractor {
    config: ExtractionConfig,
}

impl OrderNumberExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Extract the order number from a merged result.
    ///
    /// Patterns are tried most-specific first; within a pattern, candidates
    /// are scanned in ranked order and occurrences left to right. The first
    /// occurrence that validates and normalizes cleanly wins, so a
    /// keyword-anchored match always outranks a bare token regardless of
    /// candidate confidence. Returns `None` when nothing matches: the
    /// pipeline never guesses or truncates a partial token.
    pub fn extract(&self, merged: &MergedResult) -> Option<ExtractedOrderNumber> {
        for pattern in ORDER_PATTERNS.iter() {
            for ranked in &merged.candidates {
                for caps in pattern.regex.captures_iter(&ranked.candidate.text) {
                    let raw = match caps.get(1) {
                        Some(m) => m.as_str(),
                        None => continue,
                    };

                    if !self.validate(raw, pattern.keyword_anchored) {
                        debug!("Rejected '{}' from pattern {}", raw, pattern.id);
                        continue;
                    }

                    let Some(normalized) = normalize_order_number(raw) else {
                        debug!("Could not normalize '{}' into a safe filename", raw);
                        continue;
                    };

                    debug!(
                        "Matched order number '{}' via pattern {} (engine {}, score {:.2})",
                        normalized, pattern.id, ranked.candidate.engine, ranked.combined_score
                    );

                    return Some(ExtractedOrderNumber {
                        text: normalized,
                        raw: raw.to_string(),
                        pattern_id: pattern.id.to_string(),
                        candidate: ranked.candidate.clone(),
                        confidence: ranked.combined_score,
                    });
                }
            }
        }

        None
    }

    fn validate(&self, token: &str, keyword_anchored: bool) -> bool {
        // Degenerate tokens: repeated characters, too few digits.
        let distinct = {
            let mut chars: Vec<char> = token.chars().collect();
            chars.sort_unstable();
            chars.dedup();
            chars.len()
        };
        if distinct < 2 {
            return false;
        }

        let digits = token.chars().filter(|c| c.is_ascii_digit()).count();
        if digits < self.config.min_digits {
            return false;
        }

        // Courier tracking numbers share the bare-token shape; a label in
        // front of the token overrides the exclusion.
        if !keyword_anchored && self.config.exclude_courier_numbers && looks_like_courier(token) {
            return false;
        }

        true
    }
}

/// Normalize a matched token: trim, uppercase, collapse the separator
/// variants to `-`. Returns `None` when the result violates the grammar or
/// still contains a character illegal in filenames.
pub fn normalize_order_number(raw: &str) -> Option<String> {
    let normalized: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '_' | ':' => '-',
            c => c.to_ascii_uppercase(),
        })
        .collect();

    if !ORDER_GRAMMAR.is_match(&normalized) {
        return None;
    }
    if normalized.contains(FILENAME_ILLEGAL) {
        return None;
    }

    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{MergedResult, RankedCandidate};
    use pretty_assertions::assert_eq;

    fn merged_from(candidates: Vec<(&str, f32)>) -> MergedResult {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|(text, score)| RankedCandidate {
                candidate: OcrCandidate {
                    text: text.to_string(),
                    confidence: score,
                    engine: "test".to_string(),
                    bbox: [0.0; 8],
                    page_index: 0,
                },
                combined_score: score,
                engines: vec!["test".to_string()],
            })
            .collect();
        ranked.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        MergedResult {
            page_index: 0,
            candidates: ranked,
        }
    }

    fn extractor() -> OrderNumberExtractor {
        OrderNumberExtractor::new(ExtractionConfig::default())
    }

    #[test]
    fn test_keyword_anchor_outranks_confidence() {
        // The labeled candidate has the lower confidence, yet the label
        // pattern runs first and wins.
        let merged = merged_from(vec![
            ("销货出库单号: SO2024001", 0.6),
            ("SO2024001", 0.9),
        ]);

        let result = extractor().extract(&merged).unwrap();
        assert_eq!(result.text, "SO2024001");
        assert_eq!(result.pattern_id, "outbound-label-full");
        assert_eq!(result.candidate.text, "销货出库单号: SO2024001");
    }

    #[test]
    fn test_no_match_is_none() {
        let merged = merged_from(vec![("发票金额 1,234.00 元", 0.9), ("客户名称", 0.8)]);
        assert!(extractor().extract(&merged).is_none());
    }

    #[test]
    fn test_first_occurrence_within_candidate_wins() {
        let merged = merged_from(vec![(
            "出库单号: 1403-202401150001 出库单号: 1404-202401150002",
            0.9,
        )]);
        let result = extractor().extract(&merged).unwrap();
        assert_eq!(result.text, "1403-202401150001");
    }

    #[test]
    fn test_strict_pair_beats_bare_token() {
        let merged = merged_from(vec![("REF8888 和 1403-202401150001", 0.9)]);
        let result = extractor().extract(&merged).unwrap();
        assert_eq!(result.pattern_id, "strict-pair");
        assert_eq!(result.text, "1403-202401150001");
    }

    #[test]
    fn test_courier_numbers_rejected_as_bare_tokens() {
        assert!(extractor().extract(&merged_from(vec![("SF123456789012", 0.9)])).is_none());
        assert!(extractor().extract(&merged_from(vec![("1234567890123", 0.9)])).is_none());
    }

    #[test]
    fn test_label_overrides_courier_exclusion() {
        let merged = merged_from(vec![("销货出库单号: 1234567890123", 0.9)]);
        let result = extractor().extract(&merged).unwrap();
        assert_eq!(result.text, "1234567890123");
    }

    #[test]
    fn test_degenerate_tokens_rejected() {
        assert!(extractor().extract(&merged_from(vec![("8888", 0.9)])).is_none());
        assert!(extractor().extract(&merged_from(vec![("ABCD", 0.9)])).is_none());
    }

    #[test]
    fn test_result_always_satisfies_grammar() {
        let samples = vec![
            ("销货出库单号: 1403_202401150001", 0.9),
            ("单号: so:2024:001x", 0.8),
            ("1403-202401150001", 0.7),
        ];
        for sample in samples {
            if let Some(result) = extractor().extract(&merged_from(vec![sample])) {
                assert!(
                    ORDER_GRAMMAR.is_match(&result.text),
                    "'{}' violates the grammar",
                    result.text
                );
                assert!(!result.text.contains(FILENAME_ILLEGAL));
            }
        }
    }

    #[test]
    fn test_normalization_canonicalizes_separators() {
        assert_eq!(
            normalize_order_number("1403_202401150001").as_deref(),
            Some("1403-202401150001")
        );
        assert_eq!(normalize_order_number("so:2024").as_deref(), Some("SO-2024"));
        assert_eq!(normalize_order_number("AB"), None);
        assert_eq!(normalize_order_number("-1234-"), None);
    }

    #[test]
    fn test_scanning_continues_past_invalid_matches() {
        // The courier token matches bare-token first but is rejected;
        // scanning continues to the valid pair on a later candidate.
        let merged = merged_from(vec![
            ("SF123456789012", 0.9),
            ("1403-202401150001", 0.5),
        ]);
        let result = extractor().extract(&merged).unwrap();
        assert_eq!(result.text, "1403-202401150001");
    }
}
