//! Ordered merge of message rows.
//!
//! Every projection keeps its rows sorted by `(created_at, id)` and merges
//! incoming rows by id, so duplicate deliveries and out-of-order arrivals
//! converge on the same list.

use dmsync_types::Message;

/// What a merge did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The row was new and has been inserted at its ordered position.
    Inserted,
    /// A row with the same id was replaced.
    Replaced,
    /// Nothing changed (duplicate, or the incoming row is older state).
    Unchanged,
}

/// Whether `incoming` carries newer state than `existing` for the same id.
///
/// `read_at` only ever moves from `None` to `Some`, so a row that would
/// un-read a message is stale.
pub fn supersedes(incoming: &Message, existing: &Message) -> bool {
    if incoming == existing {
        return false;
    }
    !(existing.read_at.is_some() && incoming.read_at.is_none())
}

/// Insert a freshly created row, ignoring duplicates.
pub fn insert_created(list: &mut Vec<Message>, message: Message) -> MergeOutcome {
    match list.binary_search_by_key(&message.order_key(), Message::order_key) {
        Ok(_) => MergeOutcome::Unchanged,
        Err(pos) => {
            list.insert(pos, message);
            MergeOutcome::Inserted
        }
    }
}

/// Upsert a row by id: insert if missing, replace if it supersedes.
pub fn apply_row(list: &mut Vec<Message>, message: Message) -> MergeOutcome {
    match list.binary_search_by_key(&message.order_key(), Message::order_key) {
        Ok(pos) => {
            if supersedes(&message, &list[pos]) {
                list[pos] = message;
                MergeOutcome::Replaced
            } else {
                MergeOutcome::Unchanged
            }
        }
        Err(pos) => {
            list.insert(pos, message);
            MergeOutcome::Inserted
        }
    }
}
