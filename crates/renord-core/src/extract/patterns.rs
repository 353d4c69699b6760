//! Order-number patterns, from most to least specific.
//!
//! Keyword-anchored patterns bind a token to one of the known outbound
//! order-number labels; the bare patterns pick up standalone tokens. The
//! original documents label the number 销货出库单号 (outbound delivery note
//! number), with shorter label variants and predictable OCR misreadings of
//! the label characters.

use lazy_static::lazy_static;
use regex::Regex;

/// One prioritized extraction pattern. The first capture group is the
/// candidate token.
pub struct OrderPattern {
    /// Stable identifier reported with the extraction result.
    pub id: &'static str,
    pub regex: Regex,
    /// Whether the match is anchored to a known label.
    pub keyword_anchored: bool,
}

// Token shapes. Keyword-anchored positions tolerate lowercase and longer
// tokens (the label vouches for them); bare tokens must match the
// grammar's uppercase 4-16 character form outright.
const TOKEN: &str = r"([0-9A-Za-z][0-9A-Za-z\-_:]{2,18}[0-9A-Za-z])";
const TOKEN_STRICT: &str = r"([0-9A-Z][0-9A-Z\-_:]{2,14}[0-9A-Z])";
const LABEL_SEP: &str = r"[：:\s]*";

lazy_static! {
    /// Patterns in priority order.
    pub static ref ORDER_PATTERNS: Vec<OrderPattern> = vec![
        OrderPattern {
            id: "outbound-label-full",
            regex: Regex::new(&format!(r"销货出库单号{LABEL_SEP}{TOKEN}")).unwrap(),
            keyword_anchored: true,
        },
        OrderPattern {
            id: "outbound-label-short",
            regex: Regex::new(&format!(r"出库单号{LABEL_SEP}{TOKEN}")).unwrap(),
            keyword_anchored: true,
        },
        OrderPattern {
            id: "order-label",
            regex: Regex::new(&format!(r"(?:订单号|单号|编号){LABEL_SEP}{TOKEN}")).unwrap(),
            keyword_anchored: true,
        },
        // The label survives OCR with character-level confusions far more
        // often than it survives verbatim.
        OrderPattern {
            id: "outbound-label-ocr",
            regex: Regex::new(&format!(
                r"[销锗][货贷买][出山人][库里单][单里号]号?{LABEL_SEP}{TOKEN}"
            ))
            .unwrap(),
            keyword_anchored: true,
        },
        OrderPattern {
            id: "strict-pair",
            regex: Regex::new(r"\b([0-9]{4}[-_][0-9]{10,15})\b").unwrap(),
            keyword_anchored: false,
        },
        OrderPattern {
            id: "bare-token",
            regex: Regex::new(&format!(r"\b{TOKEN_STRICT}\b")).unwrap(),
            keyword_anchored: false,
        },
    ];

    /// Grammar for a normalized order number: digits, uppercase letters
    /// and `-`, starting and ending alphanumeric. Per-pattern length
    /// limits (bare tokens at 16, labeled and strict-pair tokens at 20)
    /// are enforced by the patterns themselves; this is the final gate.
    pub static ref ORDER_GRAMMAR: Regex =
        Regex::new(r"^[0-9A-Z][0-9A-Z\-]{2,18}[0-9A-Z]$").unwrap();
}

/// Carrier prefixes of courier tracking numbers, which share the bare-token
/// shape but are never the order number.
pub const COURIER_PREFIXES: [&str; 8] = ["JD", "SF", "YTO", "ZTO", "STO", "YD", "HTKY", "EMS"];

/// Pure-digit lengths typical of courier tracking numbers.
pub const COURIER_DIGIT_LENGTHS: [usize; 3] = [13, 15, 18];

/// Whether a token has the shape of a courier tracking number.
pub fn looks_like_courier(token: &str) -> bool {
    let upper = token.to_uppercase();
    if COURIER_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        return true;
    }
    token.chars().all(|c| c.is_ascii_digit()) && COURIER_DIGIT_LENGTHS.contains(&token.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_label_pattern_captures_token() {
        let pattern = &ORDER_PATTERNS[0];
        let caps = pattern
            .regex
            .captures("客户名称 XX公司 销货出库单号: 1403-202401150001 日期")
            .unwrap();
        assert_eq!(&caps[1], "1403-202401150001");
    }

    #[test]
    fn test_label_without_separator_still_matches() {
        let pattern = &ORDER_PATTERNS[0];
        let caps = pattern.regex.captures("销货出库单号SO2024001").unwrap();
        assert_eq!(&caps[1], "SO2024001");
    }

    #[test]
    fn test_ocr_confused_label_matches() {
        let pattern = ORDER_PATTERNS
            .iter()
            .find(|p| p.id == "outbound-label-ocr")
            .unwrap();
        let caps = pattern.regex.captures("销贷出库单号: 1403-202401150001").unwrap();
        assert_eq!(&caps[1], "1403-202401150001");
    }

    #[test]
    fn test_strict_pair_requires_boundaries() {
        let pattern = ORDER_PATTERNS.iter().find(|p| p.id == "strict-pair").unwrap();
        assert!(pattern.regex.is_match("total 1403-202401150001 due"));
        assert!(!pattern.regex.is_match("X1403-202401150001"));
    }

    #[test]
    fn test_bare_token_rejects_short_and_lowercase() {
        let pattern = ORDER_PATTERNS.iter().find(|p| p.id == "bare-token").unwrap();
        assert!(pattern.regex.is_match("SO2024001"));
        assert!(!pattern.regex.is_match("AB1"));
        assert!(!pattern.regex.is_match("so2024001"));
    }

    #[test]
    fn test_courier_shapes() {
        assert!(looks_like_courier("SF123456789012"));
        assert!(looks_like_courier("1234567890123"));
        assert!(looks_like_courier("jd1234567890123"));
        assert!(!looks_like_courier("1403-202401150001"));
        assert!(!looks_like_courier("SO2024001"));
    }

    #[test]
    fn test_grammar_bounds() {
        assert!(ORDER_GRAMMAR.is_match("SO2024001"));
        assert!(ORDER_GRAMMAR.is_match("1403-202401150001"));
        assert!(!ORDER_GRAMMAR.is_match("ABC"));
        assert!(!ORDER_GRAMMAR.is_match("1".repeat(21).as_str()));
        assert!(!ORDER_GRAMMAR.is_match("-SO2024001"));
    }
}
