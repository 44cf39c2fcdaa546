//! Health check endpoint.

use crate::server::DmRelay;
use crate::storage::StoreStats;
use axum::{http::StatusCode, Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status: `ok`, or `degraded` when the database is unreachable.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Users with an open feed subscription.
    pub online_users: usize,
    /// Open feed subscriptions.
    pub subscriptions: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Row counts, absent when the database is unreachable.
    pub store: Option<StoreStats>,
}

/// Health check handler.
pub async fn health_handler(
    Extension(relay): Extension<Arc<DmRelay>>,
) -> (StatusCode, Json<HealthStatus>) {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let store = match relay.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read store");
            None
        }
    };
    let (code, status) = if store.is_some() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthStatus {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            online_users: relay.online_users(),
            subscriptions: relay.total_subscriptions(),
            uptime_seconds: uptime,
            store,
        }),
    )
}
