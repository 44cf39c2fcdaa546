//! # dmsync-client
//!
//! Client library for dmsync direct messaging.
//!
//! This is the library that applications use to show conversations.
//!
//! ## Features
//!
//! - **Live views**: inbox, open thread and unread badge kept current by one
//!   change-feed subscription
//! - **Exactly-once read receipts**: conditional store updates, counter
//!   moves only on confirmed transitions
//! - **Store abstraction**: pluggable backend (SQLite relay, in-memory)
//! - **Pure state machine**: uses dmsync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use dmsync_client::{ClientConfig, MemoryProfiles, MemoryStore, MessagingClient};
//!
//! let store = MemoryStore::new().session_for(me);
//! let client = MessagingClient::new(store, MemoryProfiles::new(), ClientConfig::default())?;
//!
//! let badge = client.unread_badge(me).await?;
//! let thread = client.open_thread(me, peer).await?;
//! println!("{} unread", badge.current());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
mod dispatcher;
pub mod session;
pub mod store;
pub mod view;

pub use client::{ClientConfig, ClientError, MessagingClient};
pub use session::Session;
pub use store::{
    ChangeFeed, FeedFrame, MemoryProfiles, MemoryStore, MessageStore, ProfileDirectory,
    Subscription, DEFAULT_FEED_CAPACITY,
};
pub use view::{LiveView, ThreadSnapshot};
