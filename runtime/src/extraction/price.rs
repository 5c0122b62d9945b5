//! Tolerant price text normalization.

use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

/// Why a piece of text could not be read as a price.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceParseError {
    #[error("price text is empty")]
    Empty,

    #[error("no number in price text '{0}'")]
    NoNumber(String),

    #[error("number '{0}' is out of range")]
    OutOfRange(String),
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d[\d.,]*").expect("static regex"))
}

/// Read the first number in `text` as a decimal.
///
/// Whitespace (including no-break spaces used as digit grouping) and any
/// currency symbols are ignored. Either `,` or `.` may be the decimal mark:
///
/// - both present: the last one is decimal, the other is grouping
///   (`1.234,56` and `1,234.56` are both 1234.56);
/// - one kind, repeated: grouping (`1.234.567` is 1234567);
/// - one kind, once, followed by exactly three digits after a non-zero
///   integer part: grouping (`$1,299` is 1299);
/// - one kind, once, otherwise: decimal (`19,99` is 19.99, `0.125` is 0.125).
pub fn normalize_price(text: &str) -> Result<Decimal, PriceParseError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(PriceParseError::Empty);
    }

    let raw = number_pattern()
        .find(&compact)
        .map(|m| m.as_str().trim_end_matches(['.', ',']))
        .ok_or_else(|| PriceParseError::NoNumber(text.trim().to_string()))?;

    let canonical = canonicalize(raw);
    Decimal::from_str(&canonical).map_err(|_| PriceParseError::OutOfRange(raw.to_string()))
}

/// Rewrite a digit run with mixed separators as `digits[.digits]`.
fn canonicalize(raw: &str) -> String {
    let decimal_mark = match (raw.rfind('.'), raw.rfind(',')) {
        (Some(dot), Some(comma)) => Some(dot.max(comma)),
        (Some(pos), None) if raw.matches('.').count() == 1 => single_mark(raw, pos),
        (None, Some(pos)) if raw.matches(',').count() == 1 => single_mark(raw, pos),
        _ => None,
    };

    raw.char_indices()
        .filter_map(|(i, c)| match c {
            '0'..='9' => Some(c),
            _ if Some(i) == decimal_mark => Some('.'),
            _ => None,
        })
        .collect()
}

/// A lone separator is a thousands separator when exactly three digits
/// follow it and the integer part is not zero.
fn single_mark(raw: &str, pos: usize) -> Option<usize> {
    let (int_part, frac_part) = (&raw[..pos], &raw[pos + 1..]);
    let grouping = frac_part.len() == 3 && !int_part.trim_start_matches('0').is_empty();
    (!grouping).then_some(pos)
}
