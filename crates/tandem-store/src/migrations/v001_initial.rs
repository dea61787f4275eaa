//! v001 -- Initial schema creation.
//!
//! Creates the `users` and `messages` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    email      TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,  -- normalized identity key
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL                              -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_users_name ON users(name COLLATE NOCASE);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,   -- insertion order tie-breaker
    id           TEXT NOT NULL UNIQUE,                -- 24-hex store id
    sender       TEXT NOT NULL COLLATE NOCASE,
    receiver     TEXT NOT NULL COLLATE NOCASE,
    sender_email TEXT,
    body         TEXT NOT NULL,
    kind         TEXT NOT NULL DEFAULT 'text',        -- text | image | video
    created_at   TEXT NOT NULL                        -- RFC-3339, fixed precision
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender, receiver, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_ts
    ON messages(created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
