//! # tandem-store
//!
//! Persistent storage for tandem, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the two stores the
//! delivery engine writes to: the message store (append-only rows with
//! mutable status columns) and the user/presence store (identities, presence
//! and per-counterparty unread counters).
//!
//! Every mutation that can race is a single SQL statement: status changes are
//! conditional updates and unread counters use upserts, so concurrent writers
//! never lose an increment or regress a status.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
