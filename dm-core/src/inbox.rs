//! Conversation aggregation for the inbox view.
//!
//! One row per peer holding the latest message of the pair, ordered by
//! `(created_at, id)` descending. Seeding and live events use the same
//! "latest row wins" merge, so events that arrive while the seed query is in
//! flight are never lost.

use std::collections::{HashMap, HashSet};

use dmsync_types::{ConversationSummary, LiveEvent, Message, UserId};

use crate::merge::supersedes;

/// What applying an event did to the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxChange {
    /// The event does not involve this user.
    Ignored,
    /// First message with a new peer; the row was added.
    Inserted {
        /// The new peer
        peer: UserId,
    },
    /// A newer message replaced the peer's row and moved it.
    Moved {
        /// The peer whose row moved
        peer: UserId,
    },
    /// The peer's latest message changed state in place.
    Refreshed {
        /// The peer whose row changed
        peer: UserId,
    },
    /// Nothing changed.
    Unchanged,
}

impl InboxChange {
    /// Whether the visible list changed.
    pub fn is_visible(&self) -> bool {
        matches!(
            self,
            InboxChange::Inserted { .. } | InboxChange::Moved { .. } | InboxChange::Refreshed { .. }
        )
    }
}

/// Live inbox projection for one user.
#[derive(Debug, Clone)]
pub struct InboxProjection {
    me: UserId,
    entries: Vec<ConversationSummary>,
    names: HashMap<UserId, String>,
    names_requested: HashSet<UserId>,
}

impl InboxProjection {
    /// Create an empty inbox for `me`.
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            entries: Vec::new(),
            names: HashMap::new(),
            names_requested: HashSet::new(),
        }
    }

    /// The user this inbox belongs to.
    pub fn me(&self) -> UserId {
        self.me
    }

    /// Rows ordered newest first.
    pub fn entries(&self) -> &[ConversationSummary] {
        &self.entries
    }

    /// The row for `peer`, if any.
    pub fn entry(&self, peer: UserId) -> Option<&ConversationSummary> {
        self.entries.iter().find(|e| e.peer_id == peer)
    }

    /// Merge a snapshot of per-peer latest messages.
    ///
    /// Rows not involving `me` are skipped. Returns whether anything changed.
    pub fn seed(&mut self, recent: Vec<Message>) -> bool {
        let mut changed = false;
        for message in recent {
            let Some(peer) = self.peer_for(&message) else {
                continue;
            };
            changed |= self.upsert_latest(peer, message);
        }
        if changed {
            self.sort();
        }
        changed
    }

    /// Apply one live event.
    pub fn apply(&mut self, event: &LiveEvent) -> InboxChange {
        let message = event.message();
        let Some(peer) = self.peer_for(message) else {
            return InboxChange::Ignored;
        };

        let change = match event {
            LiveEvent::Created(_) => match self.position(peer) {
                None => {
                    let summary = self.summary(peer, message.clone());
                    self.entries.push(summary);
                    InboxChange::Inserted { peer }
                }
                Some(idx) => {
                    if message.order_key() > self.entries[idx].last_message.order_key() {
                        self.entries[idx].last_message = message.clone();
                        InboxChange::Moved { peer }
                    } else {
                        InboxChange::Unchanged
                    }
                }
            },
            LiveEvent::Updated(_) => match self.position(peer) {
                Some(idx)
                    if self.entries[idx].last_message.id == message.id
                        && supersedes(message, &self.entries[idx].last_message) =>
                {
                    self.entries[idx].last_message = message.clone();
                    InboxChange::Refreshed { peer }
                }
                _ => InboxChange::Unchanged,
            },
        };

        if matches!(change, InboxChange::Inserted { .. } | InboxChange::Moved { .. }) {
            self.sort();
        }
        change
    }

    /// Record resolved display names. Returns whether any row changed.
    pub fn set_display_names(&mut self, names: HashMap<UserId, String>) -> bool {
        let mut changed = false;
        for (user, name) in names {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.peer_id == user) {
                if entry.peer_display_name.as_deref() != Some(name.as_str()) {
                    entry.peer_display_name = Some(name.clone());
                    changed = true;
                }
            }
            self.names.insert(user, name);
        }
        changed
    }

    /// Peers that still need a name lookup; each is returned once.
    pub fn take_unresolved_peers(&mut self) -> Vec<UserId> {
        let mut pending = Vec::new();
        for entry in &self.entries {
            if entry.peer_display_name.is_none()
                && !self.names.contains_key(&entry.peer_id)
                && self.names_requested.insert(entry.peer_id)
            {
                pending.push(entry.peer_id);
            }
        }
        pending
    }

    /// Allow peers whose lookup came back empty or failed to be asked again.
    pub fn forget_name_requests(&mut self) {
        self.names_requested.clear();
    }

    fn peer_for(&self, message: &Message) -> Option<UserId> {
        if message.involves(self.me) {
            message.peer_of(self.me)
        } else {
            None
        }
    }

    fn position(&self, peer: UserId) -> Option<usize> {
        self.entries.iter().position(|e| e.peer_id == peer)
    }

    fn summary(&self, peer: UserId, message: Message) -> ConversationSummary {
        ConversationSummary {
            peer_id: peer,
            peer_display_name: self.names.get(&peer).cloned(),
            last_message: message,
        }
    }

    fn upsert_latest(&mut self, peer: UserId, message: Message) -> bool {
        match self.position(peer) {
            None => {
                let summary = self.summary(peer, message);
                self.entries.push(summary);
                true
            }
            Some(idx) => {
                let current = &self.entries[idx].last_message;
                let newer = message.order_key() > current.order_key();
                let same_but_fresher = message.id == current.id && supersedes(&message, current);
                if newer || same_but_fresher {
                    self.entries[idx].last_message = message;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.last_message.order_key().cmp(&a.last_message.order_key()));
    }
}
