//! mongolier CLI - management commands for MongoDB collections
//!
//! Usage:
//!   mongolier dumpdata -c tickets --indent 2 -o tickets.json
//!   mongolier loaddata tickets.json users.json
//!   mongolier sync --dry-run
//!   mongolier ping --alias reports
//!   mongolier serve -c tickets --port 8000
//!
//! Settings are read from `mongolier.toml` (see `--config`); `MONGOLIER_URI`
//! overrides the URI of the `default` alias.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mongolier::{ConnectionManager, Settings, DEFAULT_ALIAS};
use std::path::PathBuf;

use commands::{dumpdata, loaddata, ping, serve, sync, CommandContext};

#[derive(Parser)]
#[command(name = "mongolier")]
#[command(about = "MongoDB management commands", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = "mongolier.toml")]
    config: PathBuf,

    /// Database alias to use
    #[arg(long, global = true, default_value = DEFAULT_ALIAS)]
    alias: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export collections as a fixture file
    Dumpdata(dumpdata::DumpDataArgs),
    /// Upsert fixture files into their collections
    Loaddata(loaddata::LoadDataArgs),
    /// Create declared collections and ensure their indexes
    Sync(sync::SyncArgs),
    /// Check that the database behind an alias answers
    Ping(ping::PingArgs),
    /// Serve collections as JSON REST resources
    Serve(serve::ServeArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let settings = Settings::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    rt.block_on(async move {
        let ctx = CommandContext::new(ConnectionManager::new(settings), cli.alias);

        let outcome = match cli.command {
            Commands::Dumpdata(args) => dumpdata::execute(&ctx, args).await,
            Commands::Loaddata(args) => loaddata::execute(&ctx, args).await,
            Commands::Sync(args) => sync::execute(&ctx, args).await,
            Commands::Ping(args) => ping::execute(&ctx, args).await,
            Commands::Serve(args) => serve::execute(&ctx, args).await,
        };

        ctx.manager.shutdown().await;
        outcome
    })
}

fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok(); // Ignore error if already initialized

    Ok(())
}
