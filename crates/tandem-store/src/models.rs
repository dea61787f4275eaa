//! Domain model structs persisted in the database.
//!
//! Messages are stored and returned as [`ChatMessage`], the same type the
//! server broadcasts, so no mapping layer sits between store and wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tandem_shared::ChatMessage;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered identity. The primary key is the normalized email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub email: String,
    /// Unread messages per counterparty email. Values never go negative; a
    /// reset keeps the key with a zero count.
    pub unread_counts: BTreeMap<String, u32>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn total_unread(&self) -> u64 {
        self.unread_counts.values().map(|&c| u64::from(c)).sum()
    }
}

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

/// Outcome of a conditional status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// The row moved forward; carries the updated message.
    Advanced(ChatMessage),
    /// The message was already at or past the requested status.
    Unchanged(ChatMessage),
}

impl StatusChange {
    pub fn message(&self) -> &ChatMessage {
        match self {
            Self::Advanced(m) | Self::Unchanged(m) => m,
        }
    }

    pub fn advanced(&self) -> bool {
        matches!(self, Self::Advanced(_))
    }
}

/// Fixed-precision RFC-3339 so that text ordering matches time ordering.
pub(crate) fn to_db_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
