//! Batch orchestration: one uploaded table in, one report out.
//!
//! A batch moves through loaded, extracting, aggregated, persisted and
//! formatted, in that order. Anything that fails before extraction leaves
//! no trace in the database and opens no browser session.

use crate::aggregate::{aggregate, FailedPricePolicy, Summary};
use crate::audit::AuditLogger;
use crate::catalog::{load_catalog, ColumnNames, RawTable, TableError, TableFormat, ValidationError};
use crate::config::RuntimeConfig;
use crate::extraction::{ExtractionEngine, ExtractionResult};
use crate::pool::PoolManager;
use crate::renderer::Renderer;
use crate::report::{self, RenderStyle};
use crate::store::{Store, StoreError, StoreWriter, WriteMode};
use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unreadable table: {0}")]
    Table(#[from] TableError),

    #[error("invalid catalog: {0}")]
    Validation(#[from] ValidationError),

    #[error("batch cancelled before completion")]
    Cancelled,

    #[error("catalog not persisted: {0}")]
    Persistence(#[from] StoreError),
}

/// Everything a batch needs, passed in explicitly.
pub struct PipelineContext {
    pub engine: ExtractionEngine,
    pub store: StoreWriter,
    pub columns: ColumnNames,
    pub failed_price_policy: FailedPricePolicy,
    pub write_mode: WriteMode,
    pub render_style: RenderStyle,
    pub audit: Option<Mutex<AuditLogger>>,
}

impl PipelineContext {
    /// Wire a context from configuration: opens the database, starts its
    /// writer thread and sizes the session pool.
    pub fn from_config(config: &RuntimeConfig, renderer: Arc<dyn Renderer>) -> anyhow::Result<Self> {
        let store = Store::open(&config.database)
            .with_context(|| format!("opening database {}", config.database.display()))?;
        let audit = match &config.audit_log {
            Some(path) => Some(Mutex::new(AuditLogger::open(path)?)),
            None => None,
        };
        let pool = Arc::new(PoolManager::new(renderer, config.concurrency));

        Ok(Self {
            engine: ExtractionEngine::new(pool, config.engine_options()),
            store: StoreWriter::spawn(store)?,
            columns: config.columns.clone(),
            failed_price_policy: config.failed_price_policy,
            write_mode: config.write_mode,
            render_style: config.render_style,
            audit,
        })
    }
}

/// An uploaded table and, when known, the name it was uploaded under.
#[derive(Debug, Clone)]
pub struct BatchInput {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

impl BatchInput {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            bytes: std::fs::read(path)?,
            file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        })
    }
}

/// Outcome of a completed batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub results: Vec<ExtractionResult>,
    pub summary: Summary,
    pub persisted_rows: usize,
    /// Human-readable rendering of the batch.
    pub text: String,
}

pub struct Pipeline {
    context: PipelineContext,
}

impl Pipeline {
    pub fn new(context: PipelineContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub async fn run_batch(
        &self,
        input: BatchInput,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        let ctx = &self.context;
        let batch_id = uuid::Uuid::new_v4().to_string();

        let format = TableFormat::detect(input.file_name.as_deref(), &input.bytes);
        let table = RawTable::from_bytes(&input.bytes, format)?;
        let catalog = load_catalog(&table, &ctx.columns)?;
        info!(batch = %batch_id, ?format, items = catalog.len(), "catalog loaded");

        let results = ctx
            .engine
            .extract_all(&catalog, cancel)
            .await
            .map_err(|_| PipelineError::Cancelled)?;

        let summary = aggregate(&results, ctx.failed_price_policy);

        // Last chance to abort before anything is written.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let persisted_rows = ctx.store.write_batch(catalog, ctx.write_mode).await?;

        if let Some(audit) = &ctx.audit {
            if let Err(e) = write_audit(audit, &batch_id, &results, &summary, persisted_rows) {
                warn!(batch = %batch_id, "audit log write failed: {e:#}");
            }
        }

        let text = report::render(&results, &summary, ctx.render_style);
        info!(
            batch = %batch_id,
            mean = %summary.mean,
            priced = summary.priced,
            failed = summary.failed,
            persisted_rows,
            "batch complete"
        );

        Ok(BatchReport {
            batch_id,
            results,
            summary,
            persisted_rows,
            text,
        })
    }
}

fn write_audit(
    audit: &Mutex<AuditLogger>,
    batch_id: &str,
    results: &[ExtractionResult],
    summary: &Summary,
    persisted_rows: usize,
) -> anyhow::Result<()> {
    let mut logger = audit
        .lock()
        .map_err(|_| anyhow::anyhow!("audit logger poisoned"))?;
    logger.log_results(batch_id, results)?;
    logger.log_batch(batch_id, summary, persisted_rows)
}
