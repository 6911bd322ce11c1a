// =============================================================================
// Market-Data Ingestion & Analytics Core — Main Entry Point
// =============================================================================

mod aggregator;
mod analytics;
mod api;
mod app;
mod clock;
mod config;
mod decoder;
mod error;
mod event_bus;
mod model;
mod orchestrator;
mod rate_limit;
mod repository;
mod rest;
mod signing;
mod ws;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::EngineState;
use crate::config::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║     Market-Data Ingestion & Analytics Core — Starting    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = EngineConfig::from_env();
    let bind_addr = config.bind_addr.clone();

    let engine = EngineState::new(config);
    engine.run().await;

    let router = api::router(engine.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "observability API listening");

    let server = axum::serve(listener, router.into_make_service());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "observability API server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    engine.dispose().await;
    info!("shutdown complete");
    Ok(())
}
