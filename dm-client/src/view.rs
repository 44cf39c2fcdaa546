//! Live view handles returned to the application.

use dmsync_core::ThreadLine;
use dmsync_types::{Message, UserId};
use tokio::sync::watch;

use crate::client::ClientError;

/// A live, always-current value (inbox rows, thread, badge count).
///
/// Cloning gives another reader of the same view. The view ends when it is
/// closed on the client; waiting on a closed view returns `NotMounted`.
#[derive(Debug, Clone)]
pub struct LiveView<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> LiveView<T> {
    pub(crate) fn new(rx: watch::Receiver<T>) -> Self {
        Self { rx }
    }

    /// The current value.
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new value.
    pub async fn changed(&mut self) -> Result<T, ClientError> {
        self.rx
            .changed()
            .await
            .map_err(|_| ClientError::NotMounted("view closed"))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the value satisfies `predicate`.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&T) -> bool) -> Result<T, ClientError> {
        let value = self
            .rx
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::NotMounted("view closed"))?;
        Ok(value.clone())
    }
}

/// Rendered state of an open thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    /// The other party
    pub peer_id: UserId,
    /// Peer's display name, when resolved
    pub peer_display_name: Option<String>,
    /// Messages ordered by `(created_at, id)`, with author names
    pub lines: Vec<ThreadLine>,
    /// Whether history has been merged
    pub loaded: bool,
}

impl ThreadSnapshot {
    pub(crate) fn empty(peer_id: UserId) -> Self {
        Self {
            peer_id,
            peer_display_name: None,
            lines: Vec::new(),
            loaded: false,
        }
    }

    /// The messages without annotations.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.lines.iter().map(|line| &line.message)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the thread has no messages.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
