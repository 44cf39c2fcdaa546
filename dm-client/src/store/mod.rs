//! Store abstraction for dmsync.
//!
//! This module provides the pluggable backend the client runs against: the
//! transactional message store with its change feed, and the profile
//! directory used to resolve display names.
//!
//! # Design
//!
//! Every store handle is bound to a [`Session`]. Writes are checked against
//! the verified identity; the read transition is conditional so racing
//! mark calls report truthfully which of them performed it.
//!
//! The change feed carries MessagePack-framed [`LiveEvent`]s in commit
//! order. A [`Subscription`] decodes frames and keeps only events involving
//! its user (and, optionally, one peer).
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new().session_for(me);
//! let mut feed = store.subscribe(me).await?;
//! store.send(me, peer, "hi").await?;
//! let event = feed.next().await?;
//! ```

mod memory;

pub use memory::{MemoryProfiles, MemoryStore};

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dmsync_types::{
    BulkReadReceipt, DmError, LiveEvent, MarkOutcome, Message, MessageId, Pair, UserId,
};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::session::Session;

/// Default number of frames a slow subscriber may fall behind before lagging.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// One encoded live event.
pub type FeedFrame = Arc<[u8]>;

/// Transactional message store with a change feed.
///
/// Implementations: [`MemoryStore`] here, the SQLite store in the relay.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The session this handle acts for.
    fn session(&self) -> &Session;

    /// Insert a message with `created_at = now` and `read_at = None`.
    async fn send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, DmError>;

    /// Every message of the pair, ordered by `(created_at, id)` ascending.
    async fn history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<Message>, DmError>;

    /// Mark every unread message from `sender_id` to `receiver_id` read.
    ///
    /// Only rows this call transitioned are returned.
    async fn mark_read_bulk(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
    ) -> Result<BulkReadReceipt, DmError>;

    /// Mark one message read if it is still unread.
    ///
    /// A row addressed to the other member of the pair is returned
    /// unchanged; a row of a pair the caller is not in is `NotFound`.
    async fn mark_read_one(
        &self,
        message_id: MessageId,
        expected_receiver_id: UserId,
    ) -> Result<MarkOutcome, DmError>;

    /// The latest message of every pair `user` belongs to, newest first.
    async fn recent_per_peer(&self, user: UserId) -> Result<Vec<Message>, DmError>;

    /// Number of unread messages addressed to `user`.
    async fn unread_count(&self, user: UserId) -> Result<u64, DmError>;

    /// Ids of unread messages addressed to `user`, ascending.
    async fn unread_ids(&self, user: UserId) -> Result<Vec<MessageId>, DmError>;

    /// Open a change-feed subscription for events involving `user`.
    async fn subscribe(&self, user: UserId) -> Result<Subscription, DmError>;
}

/// Batched display-name lookups.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Names for the given ids; unknown ids are absent from the map.
    async fn display_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, DmError>;
}

/// Broadcast fan-out of committed changes.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<FeedFrame>,
    capacity: usize,
}

impl ChangeFeed {
    /// Create a feed whose subscribers may lag by up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Encode and publish one event. Returns how many subscribers got it.
    pub fn publish(&self, event: &LiveEvent) -> Result<usize, DmError> {
        let frame: FeedFrame = Arc::from(event.to_bytes()?);
        Ok(self.tx.send(frame).unwrap_or(0))
    }

    /// Subscribe to events involving `user`.
    pub fn subscribe(&self, user: UserId) -> Subscription {
        Subscription {
            user,
            peer: None,
            rx: self.tx.subscribe(),
            lease: None,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Whether the next publish evicts a frame some subscriber has not read.
    pub fn is_saturated(&self) -> bool {
        self.tx.len() >= self.capacity
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// A live subscription scoped to one user and, optionally, one peer.
#[derive(Debug)]
pub struct Subscription {
    user: UserId,
    peer: Option<UserId>,
    rx: broadcast::Receiver<FeedFrame>,
    lease: Option<Arc<dyn Any + Send + Sync>>,
}

impl Subscription {
    /// Keep `lease` alive for as long as this subscription is.
    ///
    /// Lets a store track live subscribers through weak references.
    pub fn with_lease(mut self, lease: Arc<dyn Any + Send + Sync>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Narrow the subscription to the pair `(user, peer)`.
    pub fn with_peer(mut self, peer: UserId) -> Self {
        self.peer = Some(peer);
        self
    }

    /// The subscribing user.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// The peer filter, if any.
    pub fn peer(&self) -> Option<UserId> {
        self.peer
    }

    /// Whether `event` passes this subscription's filter.
    pub fn accepts(&self, event: &LiveEvent) -> bool {
        let message = event.message();
        match self.peer {
            None => message.involves(self.user),
            Some(peer) => message.pair() == Pair::new(self.user, peer),
        }
    }

    /// Wait for the next matching event.
    ///
    /// Lag and closure surface as `StaleSubscription`; the subscriber must
    /// re-pull whatever it projects.
    pub async fn next(&mut self) -> Result<LiveEvent, DmError> {
        loop {
            let frame = match self.rx.recv().await {
                Ok(frame) => frame,
                Err(RecvError::Lagged(missed)) => {
                    return Err(DmError::StaleSubscription(format!(
                        "lagged by {} events",
                        missed
                    )))
                }
                Err(RecvError::Closed) => {
                    return Err(DmError::StaleSubscription("change feed closed".into()))
                }
            };
            let event = LiveEvent::from_bytes(&frame)?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// The next matching event if one is already queued.
    pub fn try_next(&mut self) -> Option<Result<LiveEvent, DmError>> {
        loop {
            let frame = match self.rx.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(missed)) => {
                    return Some(Err(DmError::StaleSubscription(format!(
                        "lagged by {} events",
                        missed
                    ))))
                }
                Err(TryRecvError::Closed) => {
                    return Some(Err(DmError::StaleSubscription(
                        "change feed closed".into(),
                    )))
                }
            };
            match LiveEvent::from_bytes(&frame) {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
