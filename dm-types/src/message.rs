//! Stored messages and the rows derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DmError, MessageId, Pair, Timestamp, UserId};

/// A single direct message as stored.
///
/// `id`, `sender_id`, `receiver_id`, `content` and `created_at` never change
/// after insertion. `read_at` moves from `None` to `Some` at most once.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier
    pub id: MessageId,
    /// Author
    pub sender_id: UserId,
    /// Recipient, the only user allowed to mark it read
    pub receiver_id: UserId,
    /// User-supplied text, stored as-is
    pub content: String,
    /// Commit time assigned by the store
    pub created_at: Timestamp,
    /// When the receiver first read it
    pub read_at: Option<Timestamp>,
}

impl Message {
    /// Reject content that is empty or whitespace-only.
    pub fn validate_content(content: &str) -> Result<(), DmError> {
        if content.trim().is_empty() {
            return Err(DmError::Validation(
                "message content must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The conversation this message belongs to.
    pub fn pair(&self) -> Pair {
        Pair::new(self.sender_id, self.receiver_id)
    }

    /// Total order within a pair: `created_at`, then `id`.
    pub fn order_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }

    /// Whether `user` sent or received this message.
    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == user
    }

    /// The other party, seen from `user`.
    pub fn peer_of(&self, user: UserId) -> Option<UserId> {
        self.pair().peer_of(user)
    }

    /// Whether `user` is the receiver.
    pub fn is_incoming_for(&self, user: UserId) -> bool {
        self.receiver_id == user
    }

    /// Whether this message counts toward `user`'s unread total.
    pub fn is_unread_for(&self, user: UserId) -> bool {
        self.receiver_id == user && self.read_at.is_none()
    }

    /// Whether the receiver has read it.
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

// Content is redacted so message bodies never reach logs.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("sender_id", &self.sender_id)
            .field("receiver_id", &self.receiver_id)
            .field("content", &format!("[{} bytes]", self.content.len()))
            .field("created_at", &self.created_at)
            .field("read_at", &self.read_at)
            .finish()
    }
}

/// One inbox row: the most recent message exchanged with a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The other member of the pair
    pub peer_id: UserId,
    /// Resolved display name, if the profile lookup has answered
    pub peer_display_name: Option<String>,
    /// Latest message of the pair by `(created_at, id)`
    pub last_message: Message,
}

impl ConversationSummary {
    /// Whether the latest message came from the peer and is still unread.
    pub fn has_unread(&self) -> bool {
        self.last_message.sender_id == self.peer_id && self.last_message.read_at.is_none()
    }
}

/// Result of marking a single message read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// This call performed the unread to read transition.
    Transitioned(Message),
    /// The message was already read; nothing changed.
    AlreadyRead(Message),
    /// The message is addressed to the other member; nothing changed.
    NotAddressed(Message),
}

impl MarkOutcome {
    /// The row as it is now stored.
    pub fn message(&self) -> &Message {
        match self {
            MarkOutcome::Transitioned(m)
            | MarkOutcome::AlreadyRead(m)
            | MarkOutcome::NotAddressed(m) => m,
        }
    }

    /// Whether this call changed the row.
    pub fn transitioned(&self) -> bool {
        matches!(self, MarkOutcome::Transitioned(_))
    }
}

/// Result of marking every unread message from one sender read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkReadReceipt {
    /// Rows this call moved from unread to read, in id order
    pub transitioned: Vec<Message>,
}

impl BulkReadReceipt {
    /// Number of rows this call transitioned.
    pub fn count(&self) -> usize {
        self.transitioned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: UserId, receiver: UserId, id: u64, at: i64) -> Message {
        Message {
            id: MessageId::new(id),
            sender_id: sender,
            receiver_id: receiver,
            content: "hello there".into(),
            created_at: Timestamp::from_millis(at),
            read_at: None,
        }
    }

    #[test]
    fn validate_rejects_blank_content() {
        assert!(matches!(
            Message::validate_content(""),
            Err(DmError::Validation(_))
        ));
        assert!(matches!(
            Message::validate_content(" \t\n "),
            Err(DmError::Validation(_))
        ));
        assert!(Message::validate_content(" hi ").is_ok());
    }

    #[test]
    fn order_key_breaks_ties_by_id() {
        let a = UserId::new();
        let b = UserId::new();
        let first = message(a, b, 1, 100);
        let second = message(b, a, 2, 100);
        assert!(first.order_key() < second.order_key());
    }

    #[test]
    fn unread_is_receiver_relative() {
        let a = UserId::new();
        let b = UserId::new();
        let mut m = message(a, b, 1, 100);

        assert!(m.is_unread_for(b));
        assert!(!m.is_unread_for(a));
        assert!(m.is_incoming_for(b));

        m.read_at = Some(Timestamp::from_millis(200));
        assert!(!m.is_unread_for(b));
        assert!(m.is_read());
    }

    #[test]
    fn peer_of_message() {
        let a = UserId::new();
        let b = UserId::new();
        let m = message(a, b, 1, 100);
        assert_eq!(m.peer_of(a), Some(b));
        assert_eq!(m.peer_of(b), Some(a));
        assert!(m.involves(a));
        assert!(!m.involves(UserId::new()));
        assert_eq!(m.pair(), Pair::new(b, a));
    }

    #[test]
    fn debug_redacts_content() {
        let a = UserId::new();
        let b = UserId::new();
        let mut m = message(a, b, 1, 100);
        m.content = "super secret plans".into();

        let debug = format!("{:?}", m);
        assert!(!debug.contains("super secret plans"));
        assert!(debug.contains("[18 bytes]"));
    }

    #[test]
    fn summary_unread_only_for_incoming() {
        let me = UserId::new();
        let peer = UserId::new();

        let incoming = ConversationSummary {
            peer_id: peer,
            peer_display_name: None,
            last_message: message(peer, me, 1, 100),
        };
        assert!(incoming.has_unread());

        let outgoing = ConversationSummary {
            peer_id: peer,
            peer_display_name: None,
            last_message: message(me, peer, 2, 200),
        };
        assert!(!outgoing.has_unread());
    }

    #[test]
    fn mark_outcome_accessors() {
        let a = UserId::new();
        let b = UserId::new();
        let m = message(a, b, 1, 100);

        let done = MarkOutcome::Transitioned(m.clone());
        assert!(done.transitioned());
        assert_eq!(done.message().id, MessageId::new(1));
        assert!(!MarkOutcome::AlreadyRead(m).transitioned());
    }

    #[test]
    fn message_json_roundtrip() {
        let a = UserId::new();
        let b = UserId::new();
        let m = message(a, b, 5, 100);
        let json = serde_json::to_string(&m).unwrap();
        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(m, restored);
    }
}
