//! Environment readiness check.
//!
//! Every failed check prints how to fix it. The exit status is non-zero when
//! an ingest run would not be able to start.

use crate::cli::output::{self, Styled};
use crate::config::RuntimeConfig;
use crate::renderer::chromium::{find_chromium, is_docker};
use crate::store::Store;
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Outcome {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    outcome: Outcome,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fix: Option<String>,
}

impl Check {
    fn ok(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome: Outcome::Ok,
            detail: detail.into(),
            fix: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            outcome: Outcome::Fail,
            detail: detail.into(),
            fix: Some(fix.into()),
        }
    }

    fn warn(name: &'static str, detail: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            outcome: Outcome::Warn,
            detail: detail.into(),
            fix: Some(fix.into()),
        }
    }
}

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let config = RuntimeConfig::load(config_file)?;
    let checks = tokio::task::spawn_blocking(move || collect_checks(&config)).await?;
    let ready = checks.iter().all(|c| c.outcome != Outcome::Fail);

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "ready": ready,
            "checks": checks,
        }));
    } else {
        let s = Styled::new();
        output::print_header(&s);
        output::print_section(&s, "Environment");
        for check in &checks {
            let symbol = match check.outcome {
                Outcome::Ok => s.ok_sym(),
                Outcome::Warn => s.warn_sym(),
                Outcome::Fail => s.fail_sym(),
            };
            output::print_check(symbol, &format!("{}:", check.name), &check.detail);
            if let Some(fix) = &check.fix {
                output::print_detail(fix);
            }
        }
        let has_warning = checks.iter().any(|c| c.outcome == Outcome::Warn);
        match (ready, has_warning) {
            (true, false) => output::print_status(&s, &s.green("READY"), "all checks passed"),
            (true, true) => output::print_status(&s, &s.yellow("READY"), "with warnings"),
            (false, _) => output::print_status(&s, &s.red("NOT READY"), "fix the failures above"),
        }
    }

    if ready {
        Ok(())
    } else {
        bail!("environment not ready")
    }
}

fn collect_checks(config: &RuntimeConfig) -> Vec<Check> {
    let mut checks = Vec::new();

    match find_chromium(config.chromium_path.as_deref()) {
        Some(path) => {
            let version = chromium_version(&path).unwrap_or_else(|| "unknown version".into());
            checks.push(Check::ok("Chromium", format!("{version} at {}", path.display())));

            match headless_launch(&path, config.no_sandbox) {
                Ok(ms) => checks.push(Check::ok(
                    "Headless test",
                    format!("launched and closed in {}", output::format_elapsed(ms)),
                )),
                Err(e) => {
                    let fix = if is_docker() && !config.no_sandbox {
                        "Running in a container? Set PRICEFETCH_CHROMIUM_NO_SANDBOX=1"
                    } else {
                        "Install the browser's shared libraries or point PRICEFETCH_CHROMIUM_PATH elsewhere"
                    };
                    checks.push(Check::fail("Headless test", format!("failed: {e}"), fix));
                }
            }
        }
        None => checks.push(Check::fail(
            "Chromium",
            "not found",
            "Install Chromium or set PRICEFETCH_CHROMIUM_PATH=/path/to/chrome",
        )),
    }

    checks.push(database_check(&config.database));

    if let Some(path) = &config.audit_log {
        checks.push(match crate::audit::AuditLogger::open(path) {
            Ok(_) => Check::ok("Audit log", path.display().to_string()),
            Err(e) => Check::warn(
                "Audit log",
                format!("{e:#}"),
                "Items will still be processed; fix the path to keep an audit trail",
            ),
        });
    }

    if config.concurrency == 0 {
        checks.push(Check::warn(
            "Concurrency",
            "0 configured, 1 will be used",
            "Set PRICEFETCH_CONCURRENCY to a positive number",
        ));
    } else {
        checks.push(Check::ok("Concurrency", format!("{} session(s)", config.concurrency)));
    }

    checks
}

fn database_check(path: &Path) -> Check {
    match Store::open(path).and_then(|store| store.count()) {
        Ok(rows) => Check::ok("Database", format!("{} ({rows} row(s))", path.display())),
        Err(e) => Check::fail(
            "Database",
            format!("{}: {e}", path.display()),
            "Check permissions or set PRICEFETCH_DB to a writable location",
        ),
    }
}

fn chromium_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("--version").output().ok()?;
    if output.status.success() {
        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Some(raw.replace("Google Chrome ", "").replace("Chromium ", ""))
    } else {
        None
    }
}

/// Launch headless against about:blank and wait for it to exit.
fn headless_launch(path: &Path, no_sandbox: bool) -> Result<u64> {
    let start = std::time::Instant::now();
    let mut cmd = Command::new(path);
    cmd.args(["--headless", "--disable-gpu", "--dump-dom", "about:blank"]);
    if no_sandbox {
        cmd.arg("--no-sandbox");
    }

    let output = cmd.output().map_err(|e| anyhow!("failed to launch: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{}", stderr.lines().next().unwrap_or("unknown error"));
    }
    Ok(start.elapsed().as_millis() as u64)
}
