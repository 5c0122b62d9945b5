//! Catalog loading: turn an uploaded table into ordered item records.
//!
//! Validation here is about the shape of the table only. Every required
//! column must be present or the whole batch is rejected; individual cells
//! are passed through as-is (trimmed), even when blank.

pub mod table;

pub use table::{RawTable, TableError, TableFormat};

use serde::{Deserialize, Serialize};

/// One product row: what to fetch and where the price lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub title: String,
    pub url: String,
    /// XPath expression selecting the price element.
    pub locator: String,
}

impl ItemRecord {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            locator: locator.into(),
        }
    }
}

/// Ordered records of one uploaded table.
pub type Catalog = Vec<ItemRecord>;

/// A required column: its canonical name plus accepted alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    fn matches(&self, header: &str) -> bool {
        let header = header.trim();
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(header))
    }

    fn position(&self, headers: &[String]) -> Option<usize> {
        headers.iter().position(|h| self.matches(h))
    }
}

/// Names of the three required columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    pub title: ColumnSpec,
    pub url: ColumnSpec,
    pub locator: ColumnSpec,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            title: ColumnSpec::new("title"),
            url: ColumnSpec::new("url"),
            // Older sheets call the locator column "xpath".
            locator: ColumnSpec::new("locator").with_alias("xpath"),
        }
    }
}

/// The table does not have the shape of a catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required column(s): {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },
}

/// Validate the header row and build one record per data row, in order.
pub fn load_catalog(table: &RawTable, columns: &ColumnNames) -> Result<Catalog, ValidationError> {
    let title = columns.title.position(&table.headers);
    let url = columns.url.position(&table.headers);
    let locator = columns.locator.position(&table.headers);

    let (Some(title), Some(url), Some(locator)) = (title, url, locator) else {
        let missing = [(title, &columns.title), (url, &columns.url), (locator, &columns.locator)]
            .into_iter()
            .filter(|(pos, _)| pos.is_none())
            .map(|(_, spec)| spec.name.clone())
            .collect();
        return Err(ValidationError::MissingColumns { missing });
    };

    Ok((0..table.len())
        .map(|row| {
            ItemRecord::new(
                table.cell(row, title).trim(),
                table.cell(row, url).trim(),
                table.cell(row, locator).trim(),
            )
        })
        .collect())
}
