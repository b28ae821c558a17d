//! Codesync client: sync, watch, inspect and search a project

use anyhow::{Result, anyhow};
use clap::Parser;
use codesync_engine::init_default_logging;

mod client;

use client::{Args, Commands, run_search, run_status, run_sync, run_watch};

#[tokio::main]
async fn main() -> Result<()> {
    init_default_logging().map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let args = Args::parse();

    match &args.command {
        Commands::Sync { path } => run_sync(&args, path).await,
        Commands::Watch { path, debounce_ms } => run_watch(&args, path, *debounce_ms).await,
        Commands::Status { path } => run_status(&args, path).await,
        Commands::Search { query, path, top_k } => run_search(&args, path, query, *top_k).await,
    }
}
