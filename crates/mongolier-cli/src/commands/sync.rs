//! `mongolier sync` command implementation

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Args;
use mongolier::sync::sync_collection;

/// Arguments for `mongolier sync`
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Show what would be created without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the sync command
pub async fn execute(ctx: &CommandContext, args: SyncArgs) -> Result<()> {
    let specs = &ctx.manager.settings().collections;
    if specs.is_empty() {
        println!("No collections declared in settings, nothing to sync");
        return Ok(());
    }

    if args.dry_run {
        println!("(dry-run mode - nothing will be created)");
    }

    for spec in specs {
        let alias = spec.alias.as_deref().unwrap_or(&ctx.alias);
        let conn = ctx
            .manager
            .connection(alias, spec.database.as_deref(), &spec.name)
            .await
            .with_context(|| format!("Failed to open collection '{}'", spec.name))?;

        let report = sync_collection(&conn, spec, args.dry_run)
            .await
            .with_context(|| format!("Failed to sync '{}'", spec.name))?;

        let action = match (report.created, args.dry_run) {
            (true, true) => "would create",
            (true, false) => "created",
            (false, _) => "exists",
        };
        println!("{}.{}: {}", conn.descriptor().database(), report.collection, action);
        for index in &report.indexes {
            println!("  index {}", index);
        }
    }

    Ok(())
}
