//! `mongolier dumpdata` command implementation

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Args;
use mongolier::fixtures::{self, fixtures_to_string};
use std::path::PathBuf;

/// Arguments for `mongolier dumpdata`
#[derive(Debug, Args)]
pub struct DumpDataArgs {
    /// Database to read from (defaults to the alias' default_database)
    #[arg(long)]
    pub database: Option<String>,

    /// Collection to export (can be used multiple times)
    #[arg(short, long = "collection", required = true)]
    pub collections: Vec<String>,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Pretty-print with this many spaces of indentation
    #[arg(long, value_name = "SPACES")]
    pub indent: Option<usize>,
}

/// Execute the dumpdata command
pub async fn execute(ctx: &CommandContext, args: DumpDataArgs) -> Result<()> {
    let mut sections = Vec::with_capacity(args.collections.len());

    for collection in &args.collections {
        let conn = ctx
            .manager
            .connection(&ctx.alias, args.database.as_deref(), collection)
            .await
            .with_context(|| format!("Failed to open collection '{}'", collection))?;
        let fixture = fixtures::dump(&conn)
            .await
            .with_context(|| format!("Failed to dump '{}'", collection))?;
        eprintln!(
            "Dumped {} document(s) from {}.{}",
            fixture.documents.len(),
            fixture.database,
            fixture.collection
        );
        sections.push(fixture);
    }

    let mut content = fixtures_to_string(&sections, args.indent)?;
    content.push('\n');

    match &args.output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("✅ Fixture written to {}", path.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}
