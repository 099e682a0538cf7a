//! `mongolier ping` command implementation

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Args;
use std::time::Instant;

/// Arguments for `mongolier ping`
#[derive(Debug, Args)]
pub struct PingArgs {
    /// Database to ping (defaults to the alias' default_database, then admin)
    #[arg(long)]
    pub database: Option<String>,
}

/// Execute the ping command
pub async fn execute(ctx: &CommandContext, args: PingArgs) -> Result<()> {
    let settings = ctx.manager.settings().database(&ctx.alias)?;
    let database = args
        .database
        .or_else(|| settings.default_database.clone())
        .unwrap_or_else(|| "admin".to_string());

    let started = Instant::now();
    let conn = ctx
        .manager
        .connection(&ctx.alias, Some(&database), "ping")
        .await
        .with_context(|| format!("Alias '{}' is not reachable", ctx.alias))?;
    conn.ping().await?;

    println!(
        "✅ {} ({}) answered in {} ms",
        ctx.alias,
        database,
        started.elapsed().as_millis()
    );
    Ok(())
}
