//! # dmsync-core
//!
//! Pure logic for dmsync (no I/O, instant tests).
//!
//! This crate implements the projections, read-receipt rules and the live
//! feed state machine without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about ordering and idempotence
//!
//! The actual I/O (store calls, the change feed) is performed by
//! `dmsync-client`, which feeds events in and executes the returned actions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod feed;
pub mod inbox;
pub mod merge;
pub mod receipt;
pub mod thread;
pub mod unread;

pub use feed::{Backoff, FeedAction, FeedEvent, FeedNotice, FeedState};
pub use inbox::{InboxChange, InboxProjection};
pub use merge::MergeOutcome;
pub use receipt::{MarkRequest, ReadState, ReceiptTransition, ReceiptTrigger};
pub use thread::{ThreadChange, ThreadLine, ThreadProjection, ThreadTag};
pub use unread::UnreadCounter;
