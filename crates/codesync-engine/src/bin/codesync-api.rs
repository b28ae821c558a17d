//! Sync protocol API server

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Parser;
use codesync_engine::signals::shutdown_signal;
use codesync_engine::{ServerSettings, init_production_logging};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

mod sync_api;

use sync_api::{AppState, router};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct ApiArgs {
    /// TOML settings file; `CODESYNC__*` environment variables override it
    #[arg(long, env = "CODESYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_production_logging().map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let args = ApiArgs::parse();
    let settings = ServerSettings::load(args.config.as_deref())?;
    info!("Starting codesync API server");

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;

    let state = AppState::from_settings(&settings, metrics).await?;
    let service = state.service.clone();
    let app = router(state);

    let addr: SocketAddr = settings
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", settings.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Codesync API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.cache().drain().await;
    info!("Codesync API shutdown complete");
    Ok(())
}
