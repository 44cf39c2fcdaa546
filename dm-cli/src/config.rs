//! Local identity for dm-cli.

use anyhow::{Context, Result};
use dmsync_types::UserId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const IDENTITY_FILE: &str = "identity.json";

/// Name of the database file when `--database` is not given.
pub const DEFAULT_DATABASE_FILE: &str = "dmsync.db";

/// The user this data directory acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User id registered in the store.
    pub user_id: UserId,
    /// Display name registered in the store.
    pub display_name: String,
    /// When the identity was created (Unix seconds).
    pub created_at: u64,
}

impl Identity {
    /// Create a fresh identity with a random user id.
    pub fn new(display_name: &str) -> Self {
        Self {
            user_id: UserId::new(),
            display_name: display_name.to_string(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Path of the identity file inside `data_dir`.
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(IDENTITY_FILE)
    }

    /// Load the identity from a directory.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(Self::path(data_dir))
            .await
            .context("Not initialized. Run 'dm-cli init --name <name>' first.")?;
        serde_json::from_str(&contents).context("Invalid identity file")
    }

    /// Save the identity to a directory.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = Self::path(data_dir);
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save identity")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if an identity exists.
    pub async fn exists(data_dir: &Path) -> bool {
        tokio::fs::try_exists(Self::path(data_dir))
            .await
            .unwrap_or(false)
    }
}

/// The database to use: `--database` if given, else one inside `data_dir`.
pub fn database_path(data_dir: &Path, database: Option<PathBuf>) -> PathBuf {
    database.unwrap_or_else(|| data_dir.join(DEFAULT_DATABASE_FILE))
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn identity_roundtrip() {
        let dir = tempdir().unwrap();
        assert!(!Identity::exists(dir.path()).await);

        let identity = Identity::new("alice");
        identity.save(dir.path()).await.unwrap();

        assert!(Identity::exists(dir.path()).await);
        assert_eq!(Identity::load(dir.path()).await.unwrap(), identity);
    }

    #[tokio::test]
    async fn missing_identity_explains_init() {
        let dir = tempdir().unwrap();
        let err = Identity::load(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("dm-cli init"));
    }

    #[test]
    fn database_defaults_into_data_dir() {
        let dir = Path::new("/tmp/dm");
        assert_eq!(database_path(dir, None), dir.join("dmsync.db"));
        assert_eq!(
            database_path(dir, Some(PathBuf::from("/srv/shared.db"))),
            PathBuf::from("/srv/shared.db")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn identity_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        Identity::new("alice").save(dir.path()).await.unwrap();

        let perms = tokio::fs::metadata(Identity::path(dir.path()))
            .await
            .unwrap()
            .permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn data_dir_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("test-data");
        tokio::fs::create_dir_all(&data_dir).await.unwrap();
        set_dir_permissions_0700(&data_dir).await.unwrap();

        let perms = tokio::fs::metadata(&data_dir).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o700, "dir should be 0700");
    }
}
