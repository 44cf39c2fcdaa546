//! CLI command implementations.

pub mod history;
pub mod inbox;
pub mod init;
pub mod open;
pub mod send;
pub mod unread;
pub mod users;
pub mod watch;

use anyhow::{Context, Result};
use dmsync_client::{ClientConfig, MessagingClient};
use dmsync_relay::storage::{Profile, SqliteStore};
use dmsync_types::{Timestamp, UserId};
use serde::Serialize;
use std::path::Path;

use crate::config::Identity;

/// Client over the SQLite store, which is also the profile directory.
pub type Client = MessagingClient<SqliteStore, SqliteStore>;

/// An initialized identity with a store handle verified as it.
pub struct Account {
    /// The local identity.
    pub identity: Identity,
    /// Store handle bound to the identity's session.
    pub store: SqliteStore,
}

impl Account {
    /// Load the identity in `data_dir` and open `database` for it.
    pub async fn open(data_dir: &Path, database: &Path) -> Result<Self> {
        let identity = Identity::load(data_dir).await?;
        let store = open_store(database).await?.session_for(identity.user_id);
        Ok(Self { identity, store })
    }

    /// The local user's id.
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// A messaging client acting for this account.
    pub fn client(&self) -> Result<Client> {
        Ok(MessagingClient::new(
            self.store.clone(),
            self.store.clone(),
            ClientConfig::default(),
        )?)
    }

    /// Find a peer by display name or user id.
    pub async fn resolve_peer(&self, who: &str) -> Result<Profile> {
        if let Some(profile) = self.store.find_profile(who).await? {
            return Ok(profile);
        }
        let user_id: UserId = who
            .parse()
            .ok()
            .with_context(|| format!("Unknown user '{}'. Run 'dm-cli users' to list them.", who))?;
        let names = dmsync_client::ProfileDirectory::display_names(&self.store, &[user_id]).await?;
        Ok(Profile {
            user_id,
            display_name: names
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| user_id.to_string()),
        })
    }
}

/// Open (or create) the database file.
pub async fn open_store(database: &Path) -> Result<SqliteStore> {
    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create database directory")?;
    }
    SqliteStore::new(database)
        .await
        .with_context(|| format!("Failed to open database {}", database.display()))
}

/// Print `value` as one line of JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Shorten message content for one-line listings.
pub fn preview(content: &str, max_chars: usize) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > max_chars || line.len() < content.len() {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

/// Format a store timestamp relative to now.
pub fn format_timestamp(ts: Timestamp) -> String {
    format_elapsed(Timestamp::now().as_millis().saturating_sub(ts.as_millis()))
}

fn format_elapsed(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn elapsed_is_human_readable() {
        assert_eq!(format_elapsed(-5_000), "just now");
        assert_eq!(format_elapsed(59_000), "just now");
        assert_eq!(format_elapsed(120_000), "2m ago");
        assert_eq!(format_elapsed(3 * 3_600_000), "3h ago");
        assert_eq!(format_elapsed(2 * 86_400_000), "2d ago");
    }

    #[test]
    fn preview_truncates_long_and_multiline_content() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("a long message", 6), "a long...");
        assert_eq!(preview("first\nsecond", 20), "first...");
    }

    #[tokio::test]
    async fn resolve_peer_by_name_or_id() {
        let dir = tempdir().unwrap();
        let database = dir.path().join("dm.db");
        let store = open_store(&database).await.unwrap();

        let bob = UserId::new();
        store.session_for(bob).upsert_profile(bob, "bob").await.unwrap();

        let identity = Identity::new("alice");
        let account = Account {
            store: store.session_for(identity.user_id),
            identity,
        };

        assert_eq!(account.resolve_peer("bob").await.unwrap().user_id, bob);

        let by_id = account.resolve_peer(&bob.to_string()).await.unwrap();
        assert_eq!(by_id.display_name, "bob");

        let stranger = UserId::new();
        let unnamed = account.resolve_peer(&stranger.to_string()).await.unwrap();
        assert_eq!(unnamed.display_name, stranger.to_string());

        assert!(account.resolve_peer("carol").await.is_err());
    }
}
