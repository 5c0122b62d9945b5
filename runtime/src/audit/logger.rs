//! Append-only JSONL log of batch and item outcomes.

use crate::aggregate::Summary;
use crate::extraction::{ExtractionResult, ItemFailure};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// A single audit line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Item {
        timestamp: String,
        batch_id: String,
        row: usize,
        title: String,
        url: String,
        status: &'static str,
        price: Option<String>,
        failure: Option<ItemFailure>,
        duration_ms: u64,
    },
    Batch {
        timestamp: String,
        batch_id: String,
        total: usize,
        priced: usize,
        failed: usize,
        mean: String,
        persisted_rows: usize,
    },
}

/// Append-only JSONL audit logger.
pub struct AuditLogger {
    file: File,
}

impl AuditLogger {
    /// Open or create the audit log file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log: {}", path.display()))?;

        Ok(Self { file })
    }

    /// Log an audit event.
    pub fn log(&mut self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.file, "{json}")?;
        Ok(())
    }

    /// One line per item, in row order.
    pub fn log_results(&mut self, batch_id: &str, results: &[ExtractionResult]) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        for result in results {
            self.log(&AuditEvent::Item {
                timestamp: timestamp.clone(),
                batch_id: batch_id.to_string(),
                row: result.index,
                title: result.record.title.clone(),
                url: result.record.url.clone(),
                status: if result.is_ok() { "ok" } else { "failed" },
                price: result.price.map(|p| p.to_string()),
                failure: result.failure().cloned(),
                duration_ms: result.elapsed_ms,
            })?;
        }
        Ok(())
    }

    /// Closing line for a finished batch.
    pub fn log_batch(&mut self, batch_id: &str, summary: &Summary, persisted_rows: usize) -> Result<()> {
        self.log(&AuditEvent::Batch {
            timestamp: Utc::now().to_rfc3339(),
            batch_id: batch_id.to_string(),
            total: summary.total,
            priced: summary.priced,
            failed: summary.failed,
            mean: summary.mean.to_string(),
            persisted_rows,
        })
    }
}
