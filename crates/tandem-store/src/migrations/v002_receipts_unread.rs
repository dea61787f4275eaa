//! v002 -- Delivery receipts, presence and unread counters.
//!
//! Adds the status columns to `messages`, presence columns to `users`, and
//! the `unread_counts` table (one row per owner/counterparty pair so each
//! counter can be bumped with a single upsert).

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE messages ADD COLUMN status TEXT NOT NULL DEFAULT 'sent'
    CHECK (status IN ('sent', 'delivered', 'read'));
ALTER TABLE messages ADD COLUMN delivered_at TEXT;
ALTER TABLE messages ADD COLUMN read_at TEXT;

ALTER TABLE users ADD COLUMN is_online INTEGER NOT NULL DEFAULT 0;   -- boolean 0/1
ALTER TABLE users ADD COLUMN last_seen TEXT;

UPDATE users SET last_seen = created_at WHERE last_seen IS NULL;

CREATE TABLE IF NOT EXISTS unread_counts (
    user_email         TEXT NOT NULL COLLATE NOCASE,   -- counter owner
    counterparty_email TEXT NOT NULL COLLATE NOCASE,   -- the other party
    count              INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),

    PRIMARY KEY (user_email, counterparty_email),
    FOREIGN KEY (user_email) REFERENCES users(email) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
