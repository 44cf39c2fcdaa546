//! Storage layer for dmsync-relay.
//!
//! Provides the SQLite message store, the profile table behind display-name
//! lookups, and the change feed committed writes are published to.

mod sqlite;

pub use sqlite::{SqliteStore, DEFAULT_MAX_CONNECTIONS};

use dmsync_types::UserId;
use serde::Serialize;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// The user's id.
    pub user_id: UserId,
    /// Name shown to peers.
    pub display_name: String,
}

/// Row counts for health and metrics output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Messages stored.
    pub messages: u64,
    /// Messages not yet read by their receiver.
    pub unread: u64,
    /// Registered profiles.
    pub profiles: u64,
}
