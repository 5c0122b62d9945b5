use anyhow::Result;
use clap::{Parser, Subcommand};
use pricefetch_runtime::cli::{self, ingest_cmd::IngestArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pricefetch",
    version,
    about = "Fetch catalog prices from rendered pages and store the catalog"
)]
struct Cli {
    /// JSON config file (defaults, then this file, then PRICEFETCH_* variables).
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Machine-readable output on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Only print results and errors.
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract prices for every row of a catalog file and persist it.
    Ingest(IngestArgs),
    /// Check that a browser, the database and the audit log are usable.
    Doctor,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Output flags travel as env vars so every command sees them. Set them
    // before any runtime thread exists.
    if cli.json {
        std::env::set_var("PRICEFETCH_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("PRICEFETCH_QUIET", "1");
    }
    if cli.no_color {
        std::env::set_var("PRICEFETCH_NO_COLOR", "1");
    }

    cli::init_tracing(cli.log_json, cli.quiet)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Ingest(args) => cli::ingest_cmd::run(cli.config.as_deref(), args).await,
            Commands::Doctor => cli::doctor::run(cli.config.as_deref()).await,
        }
    })
}
