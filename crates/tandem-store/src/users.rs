//! User/presence store: identities, online state and unread counters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tandem_shared::normalize_email;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{from_db_time, to_db_time, User};

const USER_COLUMNS: &str = "name, email, is_online, last_seen, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Return the user registered under `email`, creating it on first use.
    ///
    /// Idempotent: repeated calls with the same (normalized) email return the
    /// existing record unchanged. The flag is `true` when a row was created.
    pub fn get_or_create_user(&self, name: &str, email: &str) -> Result<(User, bool)> {
        let email = normalize_email(email);
        let now = to_db_time(&Utc::now());
        let created = self.conn().execute(
            "INSERT OR IGNORE INTO users (email, name, created_at, last_seen, is_online)
             VALUES (?1, ?2, ?3, ?3, 0)",
            params![email, name.trim(), now],
        )? > 0;

        if created {
            tracing::info!(email = %email, "registered new user");
        }

        Ok((self.get_user(&email)?, created))
    }

    pub fn get_user(&self, email: &str) -> Result<User> {
        let mut user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![normalize_email(email)],
                row_to_user,
            )
            .map_err(not_found)?;
        user.unread_counts = self.unread_counts(&user.email)?;
        Ok(user)
    }

    /// Resolve a participant identifier to a user: by email first, then by
    /// display name (oldest registration wins when names collide).
    pub fn find_user(&self, identifier: &str) -> Result<Option<User>> {
        let identifier = identifier.trim();
        let email: Option<String> = self
            .conn()
            .query_row(
                "SELECT email FROM users
                 WHERE email = ?1 OR name = ?1 COLLATE NOCASE
                 ORDER BY (email = ?1) DESC, created_at ASC
                 LIMIT 1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;

        email.map(|e| self.get_user(&e)).transpose()
    }

    /// Page through registered users ordered by registration time, optionally
    /// leaving one identity out. The flag is `true` when more rows remain.
    pub fn list_users(
        &self,
        limit: u32,
        offset: u32,
        exclude: Option<&str>,
    ) -> Result<(Vec<User>, bool)> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE ?1 IS NULL OR email <> ?1
             ORDER BY created_at ASC, email ASC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let exclude = exclude.map(normalize_email);
        let rows = stmt.query_map(
            params![exclude, i64::from(limit) + 1, offset],
            row_to_user,
        )?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        let has_more = users.len() > limit as usize;
        users.truncate(limit as usize);

        for user in &mut users {
            user.unread_counts = self.unread_counts(&user.email)?;
        }
        Ok((users, has_more))
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Upsert the online flag and last-seen time. Creates the user when the
    /// identity has never logged in (the name is only used in that case).
    pub fn set_presence(
        &self,
        email: &str,
        name: &str,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<User> {
        let email = normalize_email(email);
        let at = to_db_time(&at);
        self.conn().execute(
            "INSERT INTO users (email, name, created_at, last_seen, is_online)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(email) DO UPDATE SET
                 is_online = excluded.is_online,
                 last_seen = excluded.last_seen",
            params![email, name.trim(), at, online],
        )?;
        self.get_user(&email)
    }

    // ------------------------------------------------------------------
    // Unread counters
    // ------------------------------------------------------------------

    /// Atomically add one to `owner`'s counter for `counterparty`, creating
    /// the key at 1. Returns the new count.
    pub fn increment_unread(&self, owner: &str, counterparty: &str) -> Result<u32> {
        let count: i64 = self.conn().query_row(
            "INSERT INTO unread_counts (user_email, counterparty_email, count)
             VALUES (?1, ?2, 1)
             ON CONFLICT(user_email, counterparty_email) DO UPDATE SET count = count + 1
             RETURNING count",
            params![normalize_email(owner), normalize_email(counterparty)],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Set `owner`'s counter for `counterparty` to zero, keeping the key.
    pub fn reset_unread(&self, owner: &str, counterparty: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO unread_counts (user_email, counterparty_email, count)
             VALUES (?1, ?2, 0)
             ON CONFLICT(user_email, counterparty_email) DO UPDATE SET count = 0",
            params![normalize_email(owner), normalize_email(counterparty)],
        )?;
        Ok(())
    }

    pub fn unread_counts(&self, owner: &str) -> Result<BTreeMap<String, u32>> {
        let mut stmt = self.conn().prepare(
            "SELECT counterparty_email, count FROM unread_counts WHERE user_email = ?1",
        )?;
        let rows = stmt.query_map(params![normalize_email(owner)], |row| {
            let key: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((key, count.max(0) as u32))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (key, count) = row?;
            counts.insert(key, count);
        }
        Ok(counts)
    }

    pub fn total_unread(&self, owner: &str) -> Result<u64> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(count), 0) FROM unread_counts WHERE user_email = ?1",
            params![normalize_email(owner)],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a row to a [`User`] with an empty unread map; callers fill it in.
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let last_seen_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(User {
        name: row.get(0)?,
        email: row.get(1)?,
        unread_counts: BTreeMap::new(),
        is_online: row.get(2)?,
        last_seen: from_db_time(3, &last_seen_str)?,
        created_at: from_db_time(4, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn login_is_idempotent_per_normalized_email() {
        let db = Database::open_in_memory().unwrap();
        let (first, created) = db.get_or_create_user("Ann", " Ann@X.com ").unwrap();
        assert!(created);
        assert_eq!(first.email, "ann@x.com");

        let (second, created) = db.get_or_create_user("Ann", "ann@x.com").unwrap();
        assert!(!created);
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_user("ghost@x.com"), Err(StoreError::NotFound)));
    }

    #[test]
    fn find_user_by_email_or_name() {
        let db = Database::open_in_memory().unwrap();
        db.get_or_create_user("Admin", "admin@chat.com").unwrap();
        db.get_or_create_user("Ann", "ann@x.com").unwrap();

        assert_eq!(
            db.find_user("ADMIN@chat.com").unwrap().unwrap().email,
            "admin@chat.com"
        );
        assert_eq!(db.find_user("admin").unwrap().unwrap().email, "admin@chat.com");
        assert!(db.find_user("Bob").unwrap().is_none());
    }

    #[test]
    fn unread_increment_and_reset() {
        let db = Database::open_in_memory().unwrap();
        db.get_or_create_user("Admin", "admin@chat.com").unwrap();

        assert_eq!(db.increment_unread("admin@chat.com", "u@x.com").unwrap(), 1);
        assert_eq!(db.increment_unread("admin@chat.com", "U@x.com").unwrap(), 2);
        assert_eq!(db.increment_unread("admin@chat.com", "v@x.com").unwrap(), 1);
        assert_eq!(db.total_unread("admin@chat.com").unwrap(), 3);

        db.reset_unread("admin@chat.com", "u@x.com").unwrap();
        db.reset_unread("admin@chat.com", "u@x.com").unwrap();
        let user = db.get_user("admin@chat.com").unwrap();
        assert_eq!(user.unread_counts.get("u@x.com"), Some(&0));
        assert_eq!(user.unread_counts.get("v@x.com"), Some(&1));
        assert_eq!(user.total_unread(), 1);
    }

    #[test]
    fn reset_creates_zero_key() {
        let db = Database::open_in_memory().unwrap();
        db.get_or_create_user("Admin", "admin@chat.com").unwrap();
        db.reset_unread("admin@chat.com", "new@x.com").unwrap();
        assert_eq!(
            db.unread_counts("admin@chat.com").unwrap().get("new@x.com"),
            Some(&0)
        );
    }

    #[test]
    fn unread_counter_requires_owner() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.increment_unread("ghost@x.com", "u@x.com").is_err());
    }

    #[test]
    fn presence_upserts() {
        let db = Database::open_in_memory().unwrap();
        let at = Utc::now();
        let user = db.set_presence("New@x.com", "New", true, at).unwrap();
        assert!(user.is_online);
        assert_eq!(user.name, "New");

        let later = at + chrono::Duration::seconds(5);
        let user = db.set_presence("new@x.com", "Renamed", false, later).unwrap();
        assert!(!user.is_online);
        assert_eq!(user.name, "New");
        assert_eq!(user.last_seen.timestamp_micros(), later.timestamp_micros());
    }

    #[test]
    fn list_users_pages_and_excludes() {
        let db = Database::open_in_memory().unwrap();
        db.get_or_create_user("Admin", "admin@chat.com").unwrap();
        for i in 0..5 {
            db.get_or_create_user(&format!("U{i}"), &format!("u{i}@x.com"))
                .unwrap();
        }

        let (page, more) = db.list_users(3, 0, Some("admin@chat.com")).unwrap();
        assert_eq!(page.len(), 3);
        assert!(more);
        assert!(page.iter().all(|u| u.email != "admin@chat.com"));

        let (rest, more) = db.list_users(3, 3, Some("admin@chat.com")).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(!more);

        let (all, _) = db.list_users(100, 0, None).unwrap();
        assert_eq!(all.len(), 6);
    }
}
