//! Live change dispatcher.
//!
//! Routes each event from the change feed to every mounted view of one
//! client (inbox, open thread, badge) and collects the follow-up requests
//! the client must issue: per-message read receipts for arrivals into the
//! open thread, and name lookups for new inbox peers. Routing is synchronous
//! and runs under the views lock, so each view sees events one at a time in
//! feed order.

use dmsync_core::{
    InboxChange, InboxProjection, MarkRequest, ThreadChange, ThreadProjection, ThreadTag,
    UnreadCounter,
};
use dmsync_types::{ConversationSummary, LiveEvent, UserId};
use tokio::sync::watch;
use tracing::debug;

use crate::view::{LiveView, ThreadSnapshot};

/// Work the client performs after routing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FollowUp {
    /// Mark a message that arrived in the open thread read.
    MarkOne(MarkRequest),
    /// Resolve names of peers that just appeared in the inbox.
    ResolveInboxNames(Vec<UserId>),
}

pub(crate) struct InboxView {
    pub projection: InboxProjection,
    tx: watch::Sender<Vec<ConversationSummary>>,
}

impl InboxView {
    pub fn new(me: UserId) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            projection: InboxProjection::new(me),
            tx,
        }
    }

    pub fn view(&self) -> LiveView<Vec<ConversationSummary>> {
        LiveView::new(self.tx.subscribe())
    }

    pub fn publish(&self) {
        self.tx.send_replace(self.projection.entries().to_vec());
    }
}

pub(crate) struct ThreadView {
    pub projection: ThreadProjection,
    tx: watch::Sender<ThreadSnapshot>,
}

impl ThreadView {
    pub fn new(me: UserId, tag: ThreadTag) -> Self {
        let (tx, _rx) = watch::channel(ThreadSnapshot::empty(tag.peer));
        Self {
            projection: ThreadProjection::new(me, tag),
            tx,
        }
    }

    pub fn view(&self) -> LiveView<ThreadSnapshot> {
        LiveView::new(self.tx.subscribe())
    }

    pub fn publish(&self) {
        let projection = &self.projection;
        self.tx.send_replace(ThreadSnapshot {
            peer_id: projection.peer(),
            peer_display_name: projection.display_name(projection.peer()).map(str::to_string),
            lines: projection.lines(),
            loaded: projection.is_loaded(),
        });
    }
}

pub(crate) struct BadgeView {
    pub counter: UnreadCounter,
    /// Bumped on every reload; a snapshot answers only the reload it was issued for.
    pub reload: u64,
    tx: watch::Sender<u64>,
}

impl BadgeView {
    pub fn new(me: UserId) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            counter: UnreadCounter::new(me),
            reload: 0,
            tx,
        }
    }

    pub fn view(&self) -> LiveView<u64> {
        LiveView::new(self.tx.subscribe())
    }

    pub fn publish(&self) {
        if self.counter.is_ready() {
            self.tx.send_if_modified(|count| {
                let next = self.counter.count();
                let changed = *count != next;
                *count = next;
                changed
            });
        }
    }
}

/// Every view mounted on one client.
#[derive(Default)]
pub(crate) struct Views {
    pub inbox: Option<InboxView>,
    pub thread: Option<ThreadView>,
    pub badge: Option<BadgeView>,
    /// Incremented on every thread open.
    pub generation: u64,
}

impl Views {
    pub fn is_empty(&self) -> bool {
        self.inbox.is_none() && self.thread.is_none() && self.badge.is_none()
    }

    pub fn open_thread_tag(&self) -> Option<ThreadTag> {
        self.thread.as_ref().map(|t| t.projection.tag())
    }

    /// Route one event to every mounted view.
    pub fn route(&mut self, event: &LiveEvent) -> Vec<FollowUp> {
        let message = event.message();
        debug!(
            kind = event.kind(),
            message_id = %message.id,
            "routing live event"
        );
        let mut follow_ups = Vec::new();

        if let Some(inbox) = self.inbox.as_mut() {
            let change = inbox.projection.apply(event);
            if change.is_visible() {
                inbox.publish();
            }
            if matches!(change, InboxChange::Inserted { .. }) {
                let peers = inbox.projection.take_unresolved_peers();
                if !peers.is_empty() {
                    follow_ups.push(FollowUp::ResolveInboxNames(peers));
                }
            }
        }

        // Arrivals the open thread is already reading never reach the badge.
        let mut settled_by_thread = false;
        if let Some(thread) = self.thread.as_mut() {
            let projection = &mut thread.projection;
            let change = projection.apply(event);
            if let Some(id) = change.receipt() {
                follow_ups.push(FollowUp::MarkOne(MarkRequest::arrived(projection.tag(), id)));
            }
            settled_by_thread = change != ThreadChange::Ignored
                && message.sender_id == projection.peer()
                && projection.settles(message.id);
            if change.is_visible() {
                thread.publish();
            }
        }

        if let Some(badge) = self.badge.as_mut() {
            if badge.counter.observe(event, settled_by_thread) {
                badge.publish();
            }
        }

        follow_ups
    }
}
