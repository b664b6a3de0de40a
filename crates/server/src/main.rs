//! tether server entry point.
//!
//! Boots the intermediary as a reverse proxy in front of the application and
//! its API. Logs are JSON on stderr.

use anyhow::{Context, Result};
use tether_client::sync::drive;
use tether_core::AppConfig;
use tracing_subscriber::EnvFilter;

mod control;
mod error;
mod handler;
mod state;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let (state, triggers) = state::AppState::boot(&config).await?;
    state.install().await.context("cache install failed")?;

    let sync_loop = tokio::spawn(drive(state.coordinator().clone(), triggers));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, origin = %config.origin, api_base = %config.api_base, "tether listening");

    axum::serve(listener, handler::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sync_loop.abort();
    tracing::info!(in_flight = state.intermediary.lifetime().in_flight(), "settling background writes");
    state.intermediary.settle().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
