//! dm-relay binary entry point.
//!
//! Usage:
//! ```bash
//! dm-relay --config relay.toml
//! ```

use anyhow::Context;
use dmsync_relay::config::Config;
use dmsync_relay::http::{build_router, health};
use dmsync_relay::server::DmRelay;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        tracing::info!(path = %config_path.display(), "config file not found, using defaults");
        Config::default()
    };

    let relay = DmRelay::open(config)
        .await
        .context("failed to open message store")?;
    tracing::info!(
        database = %relay.config().storage.database.display(),
        feed_capacity = relay.config().feed.capacity,
        "message store ready"
    );

    health::init_start_time();
    let bind = relay.config().http.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!(address = %bind, version = env!("CARGO_PKG_VERSION"), "dm-relay listening");

    axum::serve(listener, build_router(Arc::new(relay)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("dm-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
