//! Read-receipt rules.
//!
//! A message's read state moves `Unread -> Read` exactly once. Stores apply
//! the transition conditionally and report whether the call performed it, so
//! two racing mark paths can never both claim the same message.

use dmsync_types::{Message, MessageId, Timestamp, UserId};

use crate::thread::ThreadTag;

/// Read state of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Not yet read by the receiver.
    Unread,
    /// Read; terminal.
    Read {
        /// When the transition happened
        at: Timestamp,
    },
}

/// Result of attempting the read transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptTransition {
    /// This attempt moved the message to read.
    Applied,
    /// The message was already read; nothing changed.
    AlreadyRead,
}

impl ReadState {
    /// State of a stored row.
    pub fn of(message: &Message) -> Self {
        Self::from_read_at(message.read_at)
    }

    /// State for a `read_at` column value.
    pub fn from_read_at(read_at: Option<Timestamp>) -> Self {
        match read_at {
            Some(at) => Self::Read { at },
            None => Self::Unread,
        }
    }

    /// The `read_at` column value for this state.
    pub fn read_at(&self) -> Option<Timestamp> {
        match self {
            Self::Unread => None,
            Self::Read { at } => Some(*at),
        }
    }

    /// Attempt the read transition at `now`.
    pub fn mark(self, now: Timestamp) -> (Self, ReceiptTransition) {
        match self {
            Self::Unread => (Self::Read { at: now }, ReceiptTransition::Applied),
            read @ Self::Read { .. } => (read, ReceiptTransition::AlreadyRead),
        }
    }
}

/// Why a mark-read call is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptTrigger {
    /// The thread with `sender` was opened; mark everything from them.
    OpenedThread {
        /// Whose messages to mark
        sender: UserId,
    },
    /// An incoming message landed in the open thread.
    ArrivedWhileOpen {
        /// The message to mark
        message_id: MessageId,
    },
}

/// A mark-read call tagged with the thread opening it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkRequest {
    /// What caused the request
    pub trigger: ReceiptTrigger,
    /// The open thread at issue time
    pub issued_for: ThreadTag,
}

impl MarkRequest {
    /// Request for a thread being opened.
    pub fn opened(tag: ThreadTag) -> Self {
        Self {
            trigger: ReceiptTrigger::OpenedThread { sender: tag.peer },
            issued_for: tag,
        }
    }

    /// Request for a message arriving while `tag` is open.
    pub fn arrived(tag: ThreadTag, message_id: MessageId) -> Self {
        Self {
            trigger: ReceiptTrigger::ArrivedWhileOpen { message_id },
            issued_for: tag,
        }
    }

    /// Whether the response may still touch the thread view.
    pub fn is_current(&self, open: Option<ThreadTag>) -> bool {
        open == Some(self.issued_for)
    }
}
