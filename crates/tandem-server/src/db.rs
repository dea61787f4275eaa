//! Async access to the SQLite store.
//!
//! `rusqlite` is blocking, so every call runs on the blocking pool while the
//! connection is held behind a mutex. Each closure is one atomic unit from
//! the point of view of other handlers.

use std::sync::{Arc, Mutex};

use tandem_store::{Database, Result, StoreError};

#[derive(Clone)]
pub struct SharedDb {
    inner: Arc<Mutex<Database>>,
}

impl SharedDb {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            // A panic in another call must not wedge the store for good.
            let db = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&db)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calls_run_against_the_same_database() {
        let db = SharedDb::new(Database::open_in_memory().unwrap());
        db.call(|db| db.get_or_create_user("Ann", "ann@x.com").map(|_| ()))
            .await
            .unwrap();

        let user = db.call(|db| db.get_user("ANN@x.com")).await.unwrap();
        assert_eq!(user.name, "Ann");
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let db = SharedDb::new(Database::open_in_memory().unwrap());
        db.call(|db| db.get_or_create_user("Admin", "admin@chat.com").map(|_| ()))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.call(|db| db.increment_unread("admin@chat.com", "u@x.com"))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let total = db.call(|db| db.total_unread("admin@chat.com")).await.unwrap();
        assert_eq!(total, 20);
    }
}
