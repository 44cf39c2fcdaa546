//! Main DmRelay server coordination.
//!
//! DmRelay owns the configuration and the message store, and exposes the
//! state the HTTP endpoints report on.

use crate::config::Config;
use crate::error::{Result, StorageResult};
use crate::storage::{SqliteStore, StoreStats};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Messages stored.
    pub messages_sent: AtomicU64,
    /// Bulk mark-read calls that committed.
    pub bulk_marks: AtomicU64,
    /// Single-message mark-read calls that committed.
    pub single_marks: AtomicU64,
    /// Rows moved from unread to read.
    pub rows_marked_read: AtomicU64,
    /// Mark-read calls that changed nothing.
    pub noop_marks: AtomicU64,
    /// Live events published to the change feed.
    pub events_published: AtomicU64,
    /// Publishes that pushed a lagging subscriber past the feed capacity.
    pub feed_overflows: AtomicU64,
    /// Storage operations that failed.
    pub store_errors: AtomicU64,
}

/// Main relay server.
#[derive(Debug)]
pub struct DmRelay {
    config: Config,
    store: SqliteStore,
}

impl DmRelay {
    /// Create a new DmRelay with the given config and store.
    pub fn new(config: Config, store: SqliteStore) -> Self {
        Self { config, store }
    }

    /// Open the store named by `config` and wrap it.
    pub async fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::from_config(&config).await?;
        Ok(Self::new(config, store))
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the message store.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Get the metrics.
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        self.store.metrics()
    }

    /// Users with at least one open feed subscription.
    pub fn online_users(&self) -> usize {
        self.store.hub().online_users()
    }

    /// Open feed subscriptions across all users.
    pub fn total_subscriptions(&self) -> usize {
        self.store.hub().total_subscriptions()
    }

    /// Row counts from the store.
    pub async fn stats(&self) -> StorageResult<StoreStats> {
        self.store.stats().await
    }
}
