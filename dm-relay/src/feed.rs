//! Change-feed hub for the relay.
//!
//! Fans committed events out to subscribers and keeps a registry of who
//! is currently listening.

use crate::server::RelayMetrics;
use dashmap::DashMap;
use dmsync_client::{ChangeFeed, Subscription};
use dmsync_types::{LiveEvent, UserId};
use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

/// Marker held by every open subscription.
#[derive(Debug)]
struct Lease;

/// Broadcast hub with a live-subscriber registry.
#[derive(Debug, Clone)]
pub struct FeedHub {
    feed: ChangeFeed,
    watchers: Arc<DashMap<UserId, Vec<Weak<Lease>>>>,
    metrics: Arc<RelayMetrics>,
}

impl FeedHub {
    /// Create a hub whose subscribers may lag by up to `capacity` events.
    pub fn new(capacity: usize, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            feed: ChangeFeed::new(capacity),
            watchers: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Publish one committed event.
    pub fn publish(&self, event: &LiveEvent) {
        if self.feed.is_saturated() {
            self.metrics.feed_overflows.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(kind = event.kind(), "change feed full, slow subscribers will resync");
        }
        match self.feed.publish(event) {
            Ok(delivered) => {
                self.metrics.events_published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    kind = event.kind(),
                    message_id = %event.message().id,
                    delivered,
                    "published live event"
                );
            }
            Err(e) => tracing::error!(kind = event.kind(), error = %e, "failed to publish live event"),
        }
    }

    /// Open a subscription for `user` and register it.
    pub fn subscribe(&self, user: UserId) -> Subscription {
        let lease = Arc::new(Lease);
        self.watchers
            .entry(user)
            .or_default()
            .push(Arc::downgrade(&lease));
        let lease: Arc<dyn Any + Send + Sync> = lease;
        tracing::debug!(user = %user, "registered subscriber");
        self.feed.subscribe(user).with_lease(lease)
    }

    /// Open subscriptions held by `user`.
    pub fn subscriptions(&self, user: UserId) -> usize {
        let Some(mut leases) = self.watchers.get_mut(&user) else {
            return 0;
        };
        leases.retain(|lease| lease.strong_count() > 0);
        leases.len()
    }

    /// Users with at least one open subscription.
    pub fn online_users(&self) -> usize {
        self.watchers.retain(|_, leases| {
            leases.retain(|lease| lease.strong_count() > 0);
            !leases.is_empty()
        });
        self.watchers.len()
    }

    /// Open subscriptions across all users.
    pub fn total_subscriptions(&self) -> usize {
        self.feed.subscriber_count()
    }
}
