//! # dmsync-types
//!
//! Shared data types for the dmsync direct-messaging core.
//!
//! This crate provides the foundational types used across all dmsync crates:
//! - [`UserId`], [`MessageId`], [`Timestamp`], [`Pair`] - Identity and ordering types
//! - [`Message`], [`ConversationSummary`] - Stored rows and their inbox projection
//! - [`MarkOutcome`], [`BulkReadReceipt`] - Results of read-marking
//! - [`LiveEvent`] - Change-feed events and their MessagePack framing
//! - [`DmError`] - Error taxonomy shared by stores and clients

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod ids;
mod message;

pub use error::DmError;
pub use event::LiveEvent;
pub use ids::{MessageId, Pair, Timestamp, UserId};
pub use message::{BulkReadReceipt, ConversationSummary, MarkOutcome, Message};
