//! Live events emitted by the store's change feed.

use serde::{Deserialize, Serialize};

use crate::{DmError, Message, Pair, UserId};

/// A committed change to the messages table.
///
/// Events for a single pair are delivered in commit order. Each carries the
/// full row as committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveEvent {
    /// A message was inserted.
    Created(Message),
    /// A message's `read_at` was set.
    Updated(Message),
}

impl LiveEvent {
    /// The row carried by this event.
    pub fn message(&self) -> &Message {
        match self {
            LiveEvent::Created(m) | LiveEvent::Updated(m) => m,
        }
    }

    /// Consume the event, keeping the row.
    pub fn into_message(self) -> Message {
        match self {
            LiveEvent::Created(m) | LiveEvent::Updated(m) => m,
        }
    }

    /// The pair the row belongs to.
    pub fn pair(&self) -> Pair {
        self.message().pair()
    }

    /// Whether `user` is sender or receiver of the row.
    pub fn concerns(&self, user: UserId) -> bool {
        self.message().involves(user)
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::Created(_) => "created",
            LiveEvent::Updated(_) => "updated",
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DmError> {
        rmp_serde::to_vec(self).map_err(|e| DmError::Serialization(e.to_string()))
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DmError> {
        rmp_serde::from_slice(bytes).map_err(|e| DmError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageId, Timestamp};

    fn sample() -> Message {
        Message {
            id: MessageId::new(3),
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            content: "ping".into(),
            created_at: Timestamp::from_millis(1_700_000_000_000),
            read_at: Some(Timestamp::from_millis(1_700_000_000_500)),
        }
    }

    #[test]
    fn frame_roundtrip_keeps_variant() {
        let event = LiveEvent::Updated(sample());
        let bytes = event.to_bytes().unwrap();
        let restored = LiveEvent::from_bytes(&bytes).unwrap();
        assert_eq!(event, restored);
        assert_eq!(restored.kind(), "updated");
    }

    #[test]
    fn frame_is_compact() {
        let bytes = LiveEvent::Created(sample()).to_bytes().unwrap();
        assert!(bytes.len() < 120);
    }

    #[test]
    fn garbage_frame_is_deserialization_error() {
        let result = LiveEvent::from_bytes(&[0xc1, 0x00, 0xff]);
        assert!(matches!(result, Err(DmError::Deserialization(_))));
    }

    #[test]
    fn concerns_members_only() {
        let m = sample();
        let event = LiveEvent::Created(m.clone());
        assert!(event.concerns(m.sender_id));
        assert!(event.concerns(m.receiver_id));
        assert!(!event.concerns(UserId::new()));
        assert_eq!(event.pair(), m.pair());
        assert_eq!(event.into_message(), m);
    }
}
