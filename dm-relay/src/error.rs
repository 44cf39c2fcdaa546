//! Error types for dmsync-relay.

use dmsync_types::DmError;
use std::path::PathBuf;

/// Main error type for dmsync-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt row {id}: invalid {column}")]
    CorruptRow {
        /// Row id.
        id: i64,
        /// Column that failed to decode.
        column: &'static str,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_))
        )
    }
}

impl From<StorageError> for DmError {
    fn from(e: StorageError) -> Self {
        if e.is_transient() {
            DmError::TransientNetwork(e.to_string())
        } else {
            DmError::Internal(e.to_string())
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_are_transient() {
        let err: DmError = StorageError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, DmError::TransientNetwork(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_failures_are_internal() {
        let err: DmError = StorageError::CorruptRow {
            id: 7,
            column: "sender_id",
        }
        .into();
        assert_eq!(
            err,
            DmError::Internal("corrupt row 7: invalid sender_id".into())
        );
    }

    #[test]
    fn storage_error_converts_to_relay_error() {
        let err: RelayError = StorageError::InvalidPath {
            path: PathBuf::from("bad"),
        }
        .into();
        assert!(err.to_string().contains("invalid database path"));
    }
}
