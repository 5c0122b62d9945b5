//! CLI subcommand implementations for the pricefetch binary.

pub mod doctor;
pub mod ingest_cmd;
pub mod output;

use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays clean for the report.
pub fn init_tracing(log_json: bool, quiet: bool) -> anyhow::Result<()> {
    let level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pricefetch_runtime={level}").parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
