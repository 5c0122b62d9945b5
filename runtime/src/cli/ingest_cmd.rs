//! `pricefetch ingest <FILE>`: run one catalog batch.

use crate::aggregate::FailedPricePolicy;
use crate::cli::output::{self, Styled};
use crate::config::RuntimeConfig;
use crate::pipeline::{BatchInput, Pipeline, PipelineContext, PipelineError};
use crate::renderer::chromium::ChromiumRenderer;
use crate::report::RenderStyle;
use crate::store::WriteMode;
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Catalog file (.xlsx, .xls, .ods, .csv or .tsv).
    pub file: PathBuf,

    /// SQLite database receiving the catalog rows.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Pages rendered at once.
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Per-item time limit in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// How rows without a price count toward the mean (zero|exclude).
    #[arg(long)]
    pub failed_prices: Option<FailedPricePolicy>,

    /// append|upsert
    #[arg(long)]
    pub write_mode: Option<WriteMode>,

    /// plain|html
    #[arg(long)]
    pub style: Option<RenderStyle>,

    /// Chromium or Chrome executable.
    #[arg(long)]
    pub chromium: Option<PathBuf>,

    /// Launch the browser with --no-sandbox.
    #[arg(long)]
    pub no_sandbox: bool,

    /// Append per-item outcomes to this JSONL file.
    #[arg(long)]
    pub audit_log: Option<PathBuf>,
}

impl IngestArgs {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(db) = &self.db {
            config.database = db.clone();
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if let Some(secs) = self.timeout {
            config.item_timeout_secs = secs;
        }
        if let Some(policy) = self.failed_prices {
            config.failed_price_policy = policy;
        }
        if let Some(mode) = self.write_mode {
            config.write_mode = mode;
        }
        if let Some(style) = self.style {
            config.render_style = style;
        }
        if let Some(path) = &self.chromium {
            config.chromium_path = Some(path.clone());
        }
        if self.no_sandbox {
            config.no_sandbox = true;
        }
        if let Some(path) = &self.audit_log {
            config.audit_log = Some(path.clone());
        }
    }
}

pub async fn run(config_file: Option<&Path>, args: IngestArgs) -> Result<()> {
    let mut config = RuntimeConfig::load(config_file)?;
    args.apply(&mut config);

    let input = BatchInput::from_path(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let renderer = ChromiumRenderer::new(config.chromium_options())?;
    info!(browser = %renderer.executable().display(), db = %config.database.display(), "ingest starting");

    let pipeline = Pipeline::new(PipelineContext::from_config(&config, Arc::new(renderer))?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling batch");
            on_signal.cancel();
        }
    });

    let started = Instant::now();
    let s = Styled::new();
    match pipeline.run_batch(input, &cancel).await {
        Ok(report) => {
            if output::is_json() {
                output::print_json(&serde_json::to_value(&report)?);
                return Ok(());
            }
            println!("{}", report.text);
            if !output::is_quiet() {
                eprintln!();
                output::print_check(
                    s.ok_sym(),
                    "Persisted:",
                    &format!(
                        "{} row(s) to {} in {}",
                        report.persisted_rows,
                        config.database.display(),
                        output::format_elapsed(started.elapsed().as_millis() as u64)
                    ),
                );
            }
            Ok(())
        }
        Err(e) => {
            if output::is_json() {
                output::print_json(&serde_json::json!({
                    "error": error_kind(&e),
                    "message": e.to_string(),
                }));
            } else {
                output::print_check(s.fail_sym(), "Ingest:", &s.red(&e.to_string()));
                if matches!(e, PipelineError::Cancelled) {
                    output::print_detail("Nothing was written to the database.");
                }
            }
            Err(e.into())
        }
    }
}

fn error_kind(e: &PipelineError) -> &'static str {
    match e {
        PipelineError::Table(_) => "table",
        PipelineError::Validation(_) => "validation",
        PipelineError::Cancelled => "cancelled",
        PipelineError::Persistence(_) => "persistence",
    }
}
