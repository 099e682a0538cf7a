//! `mongolier serve` command implementation
//!
//! Mounts one REST resource per collection at `/<collection>`.

use super::CommandContext;
use anyhow::{Context, Result};
use axum::Router;
use clap::Args;
use mongolier::DocumentStore;
use mongolier_api::Resource;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Arguments for `mongolier serve`
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Collection to expose (can be used multiple times)
    #[arg(short, long = "collection", required = true)]
    pub collections: Vec<String>,

    /// Database holding the collections (defaults to the alias' default_database)
    #[arg(long)]
    pub database: Option<String>,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind to
    #[arg(long, default_value = "8000")]
    pub port: u16,

    /// Only allow GET requests
    #[arg(long)]
    pub read_only: bool,
}

/// Builds the application router for the given collections
pub async fn build_router(ctx: &CommandContext, args: &ServeArgs) -> Result<Router> {
    let pagination = ctx.manager.settings().pagination.clone();
    let mut app = Router::new();

    for collection in &args.collections {
        let conn = ctx
            .manager
            .connection(&ctx.alias, args.database.as_deref(), collection)
            .await
            .with_context(|| format!("Failed to open collection '{}'", collection))?;
        let store: Arc<dyn DocumentStore> = Arc::new(conn);

        let mut resource = Resource::new(store).pagination(&pagination);
        if args.read_only {
            resource = resource.allowed_methods([axum::http::Method::GET]);
        }

        info!(collection = %collection, "Mounted resource");
        app = app.nest(&format!("/{}", collection), resource.router());
    }

    Ok(app)
}

/// Execute the serve command
pub async fn execute(ctx: &CommandContext, args: ServeArgs) -> Result<()> {
    let app = build_router(ctx, &args).await?;

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    println!("Serving {} collection(s) on http://{}", args.collections.len(), bind_addr);
    for collection in &args.collections {
        println!("  /{}/", collection);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}
