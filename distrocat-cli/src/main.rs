//! distrocat - manage local Linux root-filesystem templates
//!
//! Thin driver over `distrocat_core::CatalogManager`. Logs go to stderr,
//! command output to stdout.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use distrocat_core::{CatalogConfig, StoragePaths};

mod catalog_cli;

use catalog_cli::CatalogCommand;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "distrocat",
    about = "Catalog and download pristine Linux root-filesystem templates",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: CatalogCommand,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Storage root (defaults to $DISTROCAT_HOME or the platform data directory)
    #[clap(long, global = true)]
    root: Option<PathBuf>,
}

/// Initialize tracing from --log-level; RUST_LOG directives take precedence
fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(root: Option<PathBuf>) -> Result<CatalogConfig> {
    match root {
        Some(root) => {
            let root = std::path::absolute(&root)
                .with_context(|| format!("Invalid storage root: {}", root.display()))?;
            CatalogConfig::load_at(StoragePaths::at(root))
        }
        None => CatalogConfig::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level);

    let config = load_config(cli.root)?;
    cli.command.execute(config).await
}
