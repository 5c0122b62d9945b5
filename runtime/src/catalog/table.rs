//! Raw tabular input: spreadsheets and delimited text.

use calamine::{open_workbook_auto_from_rs, Reader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Errors reading the uploaded file itself.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("file is empty")]
    Empty,

    #[error("spreadsheet has no worksheets")]
    NoWorksheet,

    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("failed to read delimited text: {0}")]
    Delimited(#[from] csv::Error),
}

/// Input encodings understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Tsv,
    /// Excel (xlsx/xlsm/xlsb/xls) or OpenDocument spreadsheet.
    Spreadsheet,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

impl TableFormat {
    /// Pick a format from the file name, falling back to the leading bytes.
    pub fn detect(file_name: Option<&str>, bytes: &[u8]) -> Self {
        let ext = file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match ext.as_deref() {
            Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => return Self::Spreadsheet,
            Some("tsv" | "tab") => return Self::Tsv,
            Some("csv") => return Self::Csv,
            _ => {}
        }

        if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
            Self::Spreadsheet
        } else {
            Self::Csv
        }
    }
}

/// A header row plus data rows, all cells as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Decode `bytes` in the given format. The first row is the header.
    pub fn from_bytes(bytes: &[u8], format: TableFormat) -> Result<Self, TableError> {
        if bytes.is_empty() {
            return Err(TableError::Empty);
        }
        match format {
            TableFormat::Csv => Self::from_delimited(bytes, b','),
            TableFormat::Tsv => Self::from_delimited(bytes, b'\t'),
            TableFormat::Spreadsheet => Self::from_spreadsheet(bytes),
        }
    }

    fn from_delimited(bytes: &[u8], delimiter: u8) -> Result<Self, TableError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(TableError::Empty);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self::new(headers, rows))
    }

    fn from_spreadsheet(bytes: &[u8]) -> Result<Self, TableError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or(TableError::NoWorksheet)??;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());

        let headers = rows.next().ok_or(TableError::Empty)?;
        Ok(Self::new(headers, rows.collect()))
    }

    /// Cell text, or `""` when the row is shorter than the header.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
