//! `mongolier loaddata` command implementation

use super::CommandContext;
use anyhow::{bail, Context, Result};
use clap::Args;
use mongolier::fixtures::{self, read_fixtures};
use mongolier::LoadReport;
use std::path::PathBuf;

/// Arguments for `mongolier loaddata`
#[derive(Debug, Args)]
pub struct LoadDataArgs {
    /// Fixture files to load, in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Load every section into this database instead of the one it names
    #[arg(long)]
    pub database: Option<String>,
}

/// Execute the loaddata command
pub async fn execute(ctx: &CommandContext, args: LoadDataArgs) -> Result<()> {
    let mut total = LoadReport::default();
    let mut sections = 0usize;

    for path in &args.files {
        let fixtures = read_fixtures(path)?;
        if fixtures.is_empty() {
            bail!("{} contains no fixture sections", path.display());
        }

        for fixture in &fixtures {
            let database = args.database.as_deref().unwrap_or(&fixture.database);
            let conn = ctx
                .manager
                .connection(&ctx.alias, Some(database), &fixture.collection)
                .await
                .with_context(|| {
                    format!("Failed to open {}.{}", database, fixture.collection)
                })?;

            let report = fixtures::load(&conn, fixture).await.with_context(|| {
                format!(
                    "Failed to load {} into {}.{}",
                    path.display(),
                    database,
                    fixture.collection
                )
            })?;
            println!(
                "  {}.{}: {} inserted, {} replaced",
                database, fixture.collection, report.inserted, report.replaced
            );
            total += report;
            sections += 1;
        }
    }

    println!(
        "✅ Installed {} object(s) from {} section(s) in {} file(s)",
        total.total(),
        sections,
        args.files.len()
    );
    Ok(())
}
