//! # dmsync-relay
//!
//! SQLite-backed message store and change-feed relay for dmsync.
//!
//! This crate provides:
//! - [`storage::SqliteStore`], a durable implementation of the client's
//!   `MessageStore` and `ProfileDirectory` traits
//! - A change-feed hub that fans committed writes out to subscribers
//! - Health and Prometheus endpoints for running the store as a service
//!
//! ## Architecture
//!
//! ```text
//! MessagingClient ──┐                 ┌── MessagingClient
//!                   │  MessageStore   │
//!                   ├────────────────►│
//!               ┌───┴─────────────────┴───┐
//!               │      dmsync-relay       │
//!               │  write gate ─► feed hub │
//!               │  ┌──────────────────┐   │
//!               │  │ SQLite (messages)│   │
//!               │  └──────────────────┘   │
//!               └─────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! Sends and read marks are serialized through one write gate. Each write
//! commits, publishes its events, and only then releases the gate, so the
//! feed order matches commit order and `created_at` is non-decreasing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod server;
pub mod storage;
