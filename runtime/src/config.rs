//! Runtime configuration.
//!
//! Layered: built-in defaults, then an optional JSON file, then
//! `PRICEFETCH_*` environment variables. The CLI applies its flags last.

use crate::aggregate::FailedPricePolicy;
use crate::catalog::{ColumnNames, ColumnSpec};
use crate::extraction::EngineOptions;
use crate::renderer::chromium::{is_docker, ChromiumOptions};
use crate::report::RenderStyle;
use crate::store::WriteMode;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// SQLite file holding the `products` table.
    pub database: PathBuf,
    /// Rendering sessions alive at once.
    pub concurrency: usize,
    pub item_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
    /// How long to wait for a late-rendered price node.
    pub settle_ms: u64,
    pub columns: ColumnNames,
    pub failed_price_policy: FailedPricePolicy,
    pub write_mode: WriteMode,
    pub render_style: RenderStyle,
    pub chromium_path: Option<PathBuf>,
    pub no_sandbox: bool,
    /// JSONL audit trail; disabled when unset.
    pub audit_log: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("items_info.db"),
            concurrency: 4,
            item_timeout_secs: 45,
            navigation_timeout_secs: 30,
            settle_ms: 3_000,
            columns: ColumnNames::default(),
            failed_price_policy: FailedPricePolicy::default(),
            write_mode: WriteMode::default(),
            render_style: RenderStyle::default(),
            chromium_path: None,
            no_sandbox: is_docker(),
            audit_log: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, overlaid with `file` (if any) and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `PRICEFETCH_*` overrides obtained through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("PRICEFETCH_DB") {
            self.database = PathBuf::from(v);
        }
        if let Some(v) = lookup("PRICEFETCH_CONCURRENCY") {
            self.concurrency = parse_env("PRICEFETCH_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("PRICEFETCH_ITEM_TIMEOUT_SECS") {
            self.item_timeout_secs = parse_env("PRICEFETCH_ITEM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PRICEFETCH_NAV_TIMEOUT_SECS") {
            self.navigation_timeout_secs = parse_env("PRICEFETCH_NAV_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PRICEFETCH_SETTLE_MS") {
            self.settle_ms = parse_env("PRICEFETCH_SETTLE_MS", &v)?;
        }
        if let Some(v) = lookup("PRICEFETCH_TITLE_COLUMN") {
            self.columns.title = ColumnSpec::new(v);
        }
        if let Some(v) = lookup("PRICEFETCH_URL_COLUMN") {
            self.columns.url = ColumnSpec::new(v);
        }
        if let Some(v) = lookup("PRICEFETCH_LOCATOR_COLUMN") {
            self.columns.locator = ColumnSpec::new(v);
        }
        if let Some(v) = lookup("PRICEFETCH_FAILED_PRICES") {
            self.failed_price_policy = v.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(v) = lookup("PRICEFETCH_WRITE_MODE") {
            self.write_mode = v.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(v) = lookup("PRICEFETCH_RENDER_STYLE") {
            self.render_style = v.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(v) = lookup("PRICEFETCH_CHROMIUM_PATH") {
            self.chromium_path = Some(PathBuf::from(v));
        }
        if lookup("PRICEFETCH_CHROMIUM_NO_SANDBOX").is_some() {
            self.no_sandbox = true;
        }
        if let Some(v) = lookup("PRICEFETCH_AUDIT_LOG") {
            self.audit_log = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            item_timeout: Duration::from_secs(self.item_timeout_secs.max(1)),
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs.max(1)),
            settle: Duration::from_millis(self.settle_ms),
            ..EngineOptions::default()
        }
    }

    pub fn chromium_options(&self) -> ChromiumOptions {
        ChromiumOptions {
            executable: self.chromium_path.clone(),
            no_sandbox: self.no_sandbox,
            ..ChromiumOptions::default()
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid {key}='{value}': {e}"))
}
