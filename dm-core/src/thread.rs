//! Thread assembly for one open conversation.
//!
//! The projection holds the ordered messages of a single pair. It accepts
//! live events and history snapshots in any order and asks for a per-message
//! read receipt whenever an incoming unread message lands while it is open.

use std::collections::{HashMap, HashSet};

use dmsync_types::{LiveEvent, Message, MessageId, UserId};

use crate::merge::{apply_row, insert_created, MergeOutcome};

/// Identifies one opening of a thread.
///
/// Every request issued on behalf of an open thread carries the tag it was
/// issued for; a response whose tag no longer matches is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadTag {
    /// The peer of the open thread
    pub peer: UserId,
    /// Incremented on every open
    pub generation: u64,
}

/// What applying an event did to the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadChange {
    /// The event belongs to another pair.
    Ignored,
    /// A new message was inserted.
    Inserted {
        /// Set when the message must be marked read now
        mark_read: Option<MessageId>,
    },
    /// An existing message changed state.
    Replaced,
    /// The message was already listed but is still unread and nobody has
    /// asked to mark it yet.
    ReceiptDue(MessageId),
    /// Duplicate or stale delivery.
    Unchanged,
}

impl ThreadChange {
    /// Whether the visible list changed.
    pub fn is_visible(&self) -> bool {
        matches!(self, ThreadChange::Inserted { .. } | ThreadChange::Replaced)
    }

    /// The message to mark read now, if any.
    pub fn receipt(&self) -> Option<MessageId> {
        match self {
            ThreadChange::Inserted { mark_read } => *mark_read,
            ThreadChange::ReceiptDue(id) => Some(*id),
            _ => None,
        }
    }
}

/// One rendered line of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadLine {
    /// The stored row
    pub message: Message,
    /// Display name of the author, when known
    pub sender_display_name: Option<String>,
}

/// Live projection of the conversation between `me` and one peer.
#[derive(Debug, Clone)]
pub struct ThreadProjection {
    me: UserId,
    tag: ThreadTag,
    messages: Vec<Message>,
    names: HashMap<UserId, String>,
    loaded: bool,
    marks_requested: HashSet<MessageId>,
}

impl ThreadProjection {
    /// Open an empty thread between `me` and `tag.peer`.
    pub fn new(me: UserId, tag: ThreadTag) -> Self {
        Self {
            me,
            tag,
            messages: Vec::new(),
            names: HashMap::new(),
            loaded: false,
            marks_requested: HashSet::new(),
        }
    }

    /// The tag this projection was opened with.
    pub fn tag(&self) -> ThreadTag {
        self.tag
    }

    /// The other party.
    pub fn peer(&self) -> UserId {
        self.tag.peer
    }

    /// The viewing user.
    pub fn me(&self) -> UserId {
        self.me
    }

    /// Messages ordered by `(created_at, id)` ascending.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether a history snapshot has been merged.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether `message` belongs to this pair.
    pub fn accepts(&self, message: &Message) -> bool {
        (message.sender_id == self.me && message.receiver_id == self.tag.peer)
            || (message.sender_id == self.tag.peer && message.receiver_id == self.me)
    }

    /// Apply one live event.
    pub fn apply(&mut self, event: &LiveEvent) -> ThreadChange {
        if !self.accepts(event.message()) {
            return ThreadChange::Ignored;
        }
        match event {
            LiveEvent::Created(message) => {
                let outcome = insert_created(&mut self.messages, message.clone());
                let mark_read = self.claim_receipt(message.id);
                match (outcome, mark_read) {
                    (MergeOutcome::Inserted, _) => ThreadChange::Inserted { mark_read },
                    (_, Some(id)) => ThreadChange::ReceiptDue(id),
                    _ => ThreadChange::Unchanged,
                }
            }
            LiveEvent::Updated(message) => self.apply_confirmed(message.clone()),
        }
    }

    /// Merge a history snapshot. Rows already seen keep their newest state.
    pub fn load_history(&mut self, rows: Vec<Message>) -> bool {
        let mut changed = false;
        for row in rows {
            if self.accepts(&row) {
                changed |= apply_row(&mut self.messages, row) != MergeOutcome::Unchanged;
            }
        }
        self.loaded = true;
        changed
    }

    /// Merge a row confirmed by the store (a mark-read result or update).
    pub fn apply_confirmed(&mut self, row: Message) -> ThreadChange {
        if !self.accepts(&row) {
            return ThreadChange::Ignored;
        }
        match apply_row(&mut self.messages, row) {
            MergeOutcome::Inserted => ThreadChange::Inserted { mark_read: None },
            MergeOutcome::Replaced => ThreadChange::Replaced,
            MergeOutcome::Unchanged => ThreadChange::Unchanged,
        }
    }

    /// Claim every listed incoming message that is unread and has no
    /// receipt requested yet, in thread order.
    ///
    /// Rows merged from history can be committed after the bulk mark of
    /// the same open, so they need their own receipts.
    pub fn claim_receipts(&mut self) -> Vec<MessageId> {
        let due: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|m| self.wants_receipt(m))
            .map(|m| m.id)
            .collect();
        self.marks_requested.extend(due.iter().copied());
        due
    }

    /// Forget a receipt request so a later arrival may ask again.
    pub fn release_receipt(&mut self, id: MessageId) {
        self.marks_requested.remove(&id);
    }

    /// Whether the thread already accounts for the read state of `id`:
    /// the row is listed and either read or has a receipt in flight.
    pub fn settles(&self, id: MessageId) -> bool {
        self.marks_requested.contains(&id)
            || self.messages.iter().any(|m| m.id == id && m.is_read())
    }

    /// Record resolved display names.
    pub fn set_display_names(&mut self, names: HashMap<UserId, String>) -> bool {
        let mut changed = false;
        for (user, name) in names {
            if user == self.me || user == self.tag.peer {
                changed |= self.names.get(&user) != Some(&name);
                self.names.insert(user, name);
            }
        }
        changed
    }

    /// Display name of a member, if resolved.
    pub fn display_name(&self, user: UserId) -> Option<&str> {
        self.names.get(&user).map(String::as_str)
    }

    /// Messages annotated with their author's display name.
    pub fn lines(&self) -> Vec<ThreadLine> {
        self.messages
            .iter()
            .map(|m| ThreadLine {
                message: m.clone(),
                sender_display_name: self.names.get(&m.sender_id).cloned(),
            })
            .collect()
    }

    fn claim_receipt(&mut self, id: MessageId) -> Option<MessageId> {
        let row = self.messages.iter().find(|m| m.id == id)?;
        if !self.wants_receipt(row) {
            return None;
        }
        self.marks_requested.insert(id);
        Some(id)
    }

    fn wants_receipt(&self, message: &Message) -> bool {
        message.sender_id == self.tag.peer
            && message.is_unread_for(self.me)
            && !self.marks_requested.contains(&message.id)
    }
}
