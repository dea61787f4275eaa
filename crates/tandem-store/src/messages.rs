//! Message store: append-only rows whose status columns only move forward.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tandem_shared::{MessageId, MessageKind, MessageStatus};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{from_db_time, to_db_time, ChatMessage, StatusChange};

const MESSAGE_COLUMNS: &str =
    "id, sender, receiver, sender_email, body, kind, status, created_at, delivered_at, read_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Persist a new message. The status columns are written as given, which
    /// for a fresh send is `sent` with no receipt timestamps.
    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                (id, sender, receiver, sender_email, body, kind, status, created_at, delivered_at, read_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id.as_str(),
                message.sender,
                message.receiver,
                message.sender_email,
                message.text,
                message.kind.as_str(),
                message.status.as_str(),
                to_db_time(&message.timestamp),
                message.delivered_at.as_ref().map(to_db_time),
                message.read_at.as_ref().map(to_db_time),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_message(&self, id: &MessageId) -> Result<ChatMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.as_str()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// One page of the conversation between `a` and `b`.
    ///
    /// Rows are fetched newest-first so that `offset = 0` is the latest page,
    /// then reversed so the returned slice reads oldest-first. The flag is
    /// `true` when older messages remain beyond this page.
    pub fn conversation_page(
        &self,
        a: &str,
        b: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<ChatMessage>, bool)> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
             ORDER BY created_at DESC, seq DESC
             LIMIT ?3 OFFSET ?4"
        ))?;

        // One extra row tells us whether another page exists.
        let rows = stmt.query_map(
            params![a.trim(), b.trim(), i64::from(limit) + 1, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        messages.reverse();
        Ok((messages, has_more))
    }

    /// Most recent message exchanged between `a` and `b`, in either direction.
    pub fn last_message_between(&self, a: &str, b: &str) -> Result<Option<ChatMessage>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS}
                     FROM messages
                     WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
                     ORDER BY created_at DESC, seq DESC
                     LIMIT 1"
                ),
                params![a.trim(), b.trim()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Messages sent by `sender` (matched on display identity or sender
    /// email) to anyone, oldest first. `offset` counts from the oldest.
    pub fn messages_from(
        &self,
        sender: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<ChatMessage>, bool)> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE sender = ?1 OR sender_email = ?1 COLLATE NOCASE
             ORDER BY created_at ASC, seq ASC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![sender.trim(), i64::from(limit) + 1, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        Ok((messages, has_more))
    }

    pub fn count_messages_between(&self, a: &str, b: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)",
            params![a.trim(), b.trim()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------

    /// `sent → delivered`. The guard lives in the `WHERE` clause, so a
    /// message that is already delivered or read is left untouched.
    pub fn mark_message_delivered(
        &self,
        id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<StatusChange> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET status = 'delivered', delivered_at = ?2
             WHERE id = ?1 AND status = 'sent'",
            params![id.as_str(), to_db_time(&at)],
        )?;
        self.status_change(id, affected)
    }

    /// `sent | delivered → read`. Also back-fills `delivered_at` when the
    /// delivered step was skipped, so the receipt timestamps stay consistent.
    pub fn mark_message_read(&self, id: &MessageId, at: DateTime<Utc>) -> Result<StatusChange> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET status = 'read', read_at = ?2, delivered_at = COALESCE(delivered_at, ?2)
             WHERE id = ?1 AND status <> 'read'",
            params![id.as_str(), to_db_time(&at)],
        )?;
        self.status_change(id, affected)
    }

    fn status_change(&self, id: &MessageId, affected: usize) -> Result<StatusChange> {
        let message = self.get_message(id)?;
        Ok(if affected > 0 {
            StatusChange::Advanced(message)
        } else {
            StatusChange::Unchanged(message)
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(7)?;
    let delivered_str: Option<String> = row.get(8)?;
    let read_str: Option<String> = row.get(9)?;

    let id = MessageId::parse(&id_str)
        .ok_or_else(|| conversion_error(0, format!("invalid message id: {id_str}")))?;
    let kind: MessageKind = kind_str.parse().map_err(|e| conversion_error(5, e))?;
    let status: MessageStatus = status_str.parse().map_err(|e| conversion_error(6, e))?;

    Ok(ChatMessage {
        id,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        sender_email: row.get(3)?,
        text: row.get(4)?,
        kind,
        status,
        timestamp: from_db_time(7, &created_str)?,
        delivered_at: delivered_str.map(|s| from_db_time(8, &s)).transpose()?,
        read_at: read_str.map(|s| from_db_time(9, &s)).transpose()?,
        temp_id: None,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Duration;

    use super::*;
    use crate::error::StoreError;

    const ADMIN: &str = "admin@chat.com";
    const USER: &str = "u@x.com";

    fn message(sender: &str, receiver: &str, text: &str, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: MessageId::generate(),
            sender: sender.into(),
            receiver: receiver.into(),
            sender_email: Some(sender.into()),
            text: text.into(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            timestamp: at,
            delivered_at: None,
            read_at: None,
            temp_id: None,
        }
    }

    fn seeded(count: usize) -> (Database, Vec<ChatMessage>) {
        let db = Database::open_in_memory().unwrap();
        let start = Utc::now() - Duration::hours(1);
        let mut all = Vec::new();
        for i in 0..count {
            let (s, r) = if i % 2 == 0 { (USER, ADMIN) } else { (ADMIN, USER) };
            let msg = message(s, r, &format!("m{i}"), start + Duration::seconds(i as i64));
            db.insert_message(&msg).unwrap();
            all.push(msg);
        }
        (db, all)
    }

    #[test]
    fn insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let msg = message(USER, ADMIN, "hello", Utc::now());
        db.insert_message(&msg).unwrap();

        let loaded = db.get_message(&msg.id).unwrap();
        assert_eq!(loaded.text, "hello");
        assert_eq!(loaded.status, MessageStatus::Sent);
        assert!(loaded.delivered_at.is_none());
        assert!(loaded.timestamps_consistent());
    }

    #[test]
    fn missing_message_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.get_message(&MessageId::generate()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn pagination_covers_conversation_without_duplicates() {
        let (db, all) = seeded(35);

        let (newest, more_after_first) = db.conversation_page(USER, ADMIN, 20, 0).unwrap();
        let (older, more_after_second) = db.conversation_page(ADMIN, USER, 20, 20).unwrap();
        assert_eq!(newest.len(), 20);
        assert_eq!(older.len(), 15);
        assert!(more_after_first);
        assert!(!more_after_second);

        // Each page is oldest-first; the later fetch holds the older page.
        let combined: Vec<_> = older.iter().chain(newest.iter()).collect();
        let ids: HashSet<_> = combined.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids.len(), 35);
        let texts: Vec<_> = combined.iter().map(|m| m.text.clone()).collect();
        let expected: Vec<_> = all.iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn conversation_match_ignores_case_and_other_pairs() {
        let (db, _) = seeded(3);
        db.insert_message(&message("v@x.com", ADMIN, "other", Utc::now()))
            .unwrap();

        let (page, _) = db.conversation_page("U@X.COM", ADMIN, 20, 0).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(db.count_messages_between(ADMIN, USER).unwrap(), 3);
    }

    #[test]
    fn messages_from_one_sender_oldest_first() {
        let (db, all) = seeded(7);
        db.insert_message(&message("v@x.com", ADMIN, "other", Utc::now()))
            .unwrap();

        let (first, more) = db.messages_from("U@x.com", 3, 0).unwrap();
        let (rest, more_after) = db.messages_from(USER, 3, 3).unwrap();
        assert!(more);
        assert!(!more_after);

        let texts: Vec<_> = first.iter().chain(rest.iter()).map(|m| m.text.clone()).collect();
        let expected: Vec<_> = all
            .iter()
            .filter(|m| m.sender == USER)
            .map(|m| m.text.clone())
            .collect();
        assert_eq!(texts, expected);
        assert_eq!(texts, vec!["m0", "m2", "m4", "m6"]);
    }

    #[test]
    fn last_message_between_picks_newest() {
        let (db, all) = seeded(4);
        let last = db.last_message_between(ADMIN, USER).unwrap().unwrap();
        assert_eq!(last.id, all[3].id);
        assert!(db.last_message_between(ADMIN, "nobody@x.com").unwrap().is_none());
    }

    #[test]
    fn delivered_then_read() {
        let (db, all) = seeded(1);
        let id = &all[0].id;

        let change = db.mark_message_delivered(id, Utc::now()).unwrap();
        assert!(change.advanced());
        assert_eq!(change.message().status, MessageStatus::Delivered);
        assert!(change.message().timestamps_consistent());

        let again = db.mark_message_delivered(id, Utc::now()).unwrap();
        assert!(!again.advanced());

        let read = db.mark_message_read(id, Utc::now()).unwrap();
        assert!(read.advanced());
        assert_eq!(read.message().status, MessageStatus::Read);
        assert!(read.message().timestamps_consistent());
    }

    #[test]
    fn read_is_idempotent() {
        let (db, all) = seeded(1);
        let id = &all[0].id;

        let first = db.mark_message_read(id, Utc::now()).unwrap();
        let read_at = first.message().read_at;
        assert!(read_at.is_some());

        let second = db
            .mark_message_read(id, Utc::now() + Duration::seconds(30))
            .unwrap();
        assert!(!second.advanced());
        assert_eq!(second.message().status, MessageStatus::Read);
        assert_eq!(second.message().read_at, read_at);
    }

    #[test]
    fn delivered_never_regresses_read() {
        let (db, all) = seeded(1);
        let id = &all[0].id;

        db.mark_message_read(id, Utc::now()).unwrap();
        let change = db.mark_message_delivered(id, Utc::now()).unwrap();
        assert!(!change.advanced());
        assert_eq!(change.message().status, MessageStatus::Read);
        // Skipped delivered step is back-filled.
        assert!(change.message().delivered_at.is_some());
    }

    #[test]
    fn status_update_on_missing_message() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .mark_message_delivered(&MessageId::generate(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
