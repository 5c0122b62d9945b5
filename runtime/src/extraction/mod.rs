//! Price extraction: render each catalog item, resolve its locator and read
//! the price.
//!
//! Failures are per item. Whatever goes wrong with one page (bad URL, load
//! error, timeout, missing node, unreadable text, even a crashed worker) is
//! recorded on that item's [`ExtractionResult`] and the batch carries on.

pub mod engine;
pub mod locator;
pub mod price;

pub use engine::{BatchCancelled, EngineOptions, ExtractionEngine};
pub use price::{normalize_price, PriceParseError};

use crate::catalog::ItemRecord;
use rust_decimal::Decimal;
use serde::Serialize;

/// Broad class of an item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    /// Network, timeout or rendering problem.
    Fetch,
    /// The page loaded but no usable price was found.
    Parse,
}

/// Why one item has no price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ItemFailure {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("rendering session unavailable: {0}")]
    Session(String),

    #[error("page failed to load: {0}")]
    Fetch(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("worker fault: {0}")]
    Fault(String),

    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    #[error("locator matched nothing")]
    NotFound,

    #[error("matched element has no text")]
    EmptyText,

    #[error("no number in '{0}'")]
    NoNumber(String),

    #[error("unreadable number '{0}'")]
    Unparseable(String),
}

impl ItemFailure {
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::InvalidUrl(_)
            | Self::Session(_)
            | Self::Fetch(_)
            | Self::Timeout(_)
            | Self::Fault(_) => FailureCategory::Fetch,
            Self::InvalidLocator(_)
            | Self::NotFound
            | Self::EmptyText
            | Self::NoNumber(_)
            | Self::Unparseable(_) => FailureCategory::Parse,
        }
    }
}

impl From<PriceParseError> for ItemFailure {
    fn from(err: PriceParseError) -> Self {
        match err {
            PriceParseError::Empty => Self::EmptyText,
            PriceParseError::NoNumber(text) => Self::NoNumber(text),
            PriceParseError::OutOfRange(text) => Self::Unparseable(text),
        }
    }
}

/// Outcome state of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Ok,
    Failed(ItemFailure),
}

/// The outcome of extracting one catalog row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    /// Zero-based row position in the catalog.
    pub index: usize,
    pub record: ItemRecord,
    /// Present exactly when `status` is `Ok`.
    pub price: Option<Decimal>,
    pub status: ItemStatus,
    pub elapsed_ms: u64,
}

impl ExtractionResult {
    pub fn ok(index: usize, record: ItemRecord, price: Decimal, elapsed_ms: u64) -> Self {
        Self {
            index,
            record,
            price: Some(price),
            status: ItemStatus::Ok,
            elapsed_ms,
        }
    }

    pub fn failed(index: usize, record: ItemRecord, failure: ItemFailure, elapsed_ms: u64) -> Self {
        Self {
            index,
            record,
            price: None,
            status: ItemStatus::Failed(failure),
            elapsed_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ItemStatus::Ok)
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match &self.status {
            ItemStatus::Ok => None,
            ItemStatus::Failed(failure) => Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_categories() {
        assert_eq!(ItemFailure::Timeout(10).category(), FailureCategory::Fetch);
        assert_eq!(ItemFailure::Fetch("dns".into()).category(), FailureCategory::Fetch);
        assert_eq!(ItemFailure::NotFound.category(), FailureCategory::Parse);
        assert_eq!(ItemFailure::NoNumber("n/a".into()).category(), FailureCategory::Parse);
    }

    #[test]
    fn test_price_errors_map_to_parse_failures() {
        assert_eq!(ItemFailure::from(PriceParseError::Empty), ItemFailure::EmptyText);
        assert_eq!(
            ItemFailure::from(PriceParseError::NoNumber("free".into())),
            ItemFailure::NoNumber("free".into())
        );
    }

    #[test]
    fn test_result_serializes_failure_kind() {
        let result = ExtractionResult::failed(
            0,
            ItemRecord::new("W", "http://x", "//p"),
            ItemFailure::Timeout(500),
            500,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["price"], serde_json::Value::Null);
        assert_eq!(json["status"]["failed"]["kind"], "timeout");
        assert_eq!(json["status"]["failed"]["detail"], 500);
        assert!(!result.is_ok());
    }
}
