//! Error types for dmsync.

use thiserror::Error;

/// Errors that can occur in dmsync store and client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmError {
    /// Input rejected before any state change (e.g. empty content)
    #[error("validation failed: {0}")]
    Validation(String),

    /// No verified session, or the session does not own the operation
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// Store or live-feed call failed or timed out
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Live feed dropped events or disconnected
    #[error("live subscription is stale: {0}")]
    StaleSubscription(String),

    /// Referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl DmError {
    /// Whether a read operation may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DmError::TransientNetwork(_))
    }

    /// Whether open views must be re-pulled from the store.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            DmError::StaleSubscription(_) | DmError::Deserialization(_)
        )
    }
}
