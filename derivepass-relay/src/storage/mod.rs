//! SQLite storage backend for the relay.

pub mod models;

use crate::error::RelayError;
use models::{IncomingObject, StoredObject};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe relay storage.
#[derive(Clone)]
pub struct RelayStorage {
    conn: Arc<Mutex<Connection>>,
}

impl RelayStorage {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<(), anyhow::Error> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_modified_at INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS tokens (
                token TEXT PRIMARY KEY,
                user_name TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                FOREIGN KEY (user_name) REFERENCES users(name) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS objects (
                user_name TEXT NOT NULL,
                object_id TEXT NOT NULL,
                data TEXT NOT NULL,
                modified_at INTEGER NOT NULL,
                PRIMARY KEY (user_name, object_id),
                FOREIGN KEY (user_name) REFERENCES users(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_objects_user_modified
                ON objects(user_name, modified_at);
            CREATE INDEX IF NOT EXISTS idx_tokens_user
                ON tokens(user_name);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RelayError> {
        self.conn
            .lock()
            .map_err(|e| RelayError::Internal(format!("Lock error: {}", e)))
    }

    /// Create an account; fails with `Conflict` if the name is taken
    pub fn insert_user(&self, name: &str, password_hash: &str, now: i64) -> Result<(), RelayError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (name, password_hash, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, password_hash, now],
        )?;

        if inserted == 0 {
            return Err(RelayError::Conflict(format!("User {} already exists", name)));
        }
        Ok(())
    }

    pub fn password_hash(&self, name: &str) -> Result<Option<String>, RelayError> {
        let conn = self.conn()?;
        let hash = conn
            .query_row(
                "SELECT password_hash FROM users WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn insert_token(&self, token: &str, user: &str, now: i64) -> Result<(), RelayError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tokens (token, user_name, issued_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![token, user, now],
        )?;
        Ok(())
    }

    /// Owner of `token`, if it is live
    pub fn token_user(&self, token: &str) -> Result<Option<String>, RelayError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT user_name FROM tokens WHERE token = ?1",
                [token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user)
    }

    /// Revoke one of `user`'s tokens. Returns whether it existed.
    pub fn delete_token(&self, user: &str, token: &str) -> Result<bool, RelayError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM tokens WHERE token = ?1 AND user_name = ?2",
            rusqlite::params![token, user],
        )?;
        Ok(deleted > 0)
    }

    /// Objects of `user` stamped after `since`, oldest first
    pub fn objects_since(&self, user: &str, since: i64) -> Result<Vec<StoredObject>, RelayError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT object_id, data, modified_at
             FROM objects
             WHERE user_name = ?1 AND modified_at > ?2
             ORDER BY modified_at ASC, object_id ASC",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![user, since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, data, modified_at)| -> Result<StoredObject, RelayError> {
                Ok(StoredObject {
                    id,
                    data: serde_json::from_str(&data)?,
                    modified_at,
                })
            })
            .collect()
    }

    /// Upsert a batch under one fresh `modifiedAt`
    ///
    /// The stamp is `max(now, last + 1)` for the user, so batches are
    /// strictly ordered even when the wall clock steps back. An empty
    /// batch stores nothing and returns the current stamp.
    pub fn put_objects(
        &self,
        user: &str,
        objects: &[IncomingObject],
        now: i64,
    ) -> Result<i64, RelayError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let last: i64 = tx.query_row(
            "SELECT last_modified_at FROM users WHERE name = ?1",
            [user],
            |row| row.get(0),
        )?;
        if objects.is_empty() {
            return Ok(last);
        }

        let modified_at = now.max(last + 1);
        tx.execute(
            "UPDATE users SET last_modified_at = ?1 WHERE name = ?2",
            rusqlite::params![modified_at, user],
        )?;

        {
            let mut upsert = tx.prepare(
                "INSERT INTO objects (user_name, object_id, data, modified_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_name, object_id) DO UPDATE SET
                    data = excluded.data,
                    modified_at = excluded.modified_at",
            )?;
            for object in objects {
                upsert.execute(rusqlite::params![
                    user,
                    object.id,
                    object.data.to_string(),
                    modified_at
                ])?;
            }
        }

        tx.commit()?;
        Ok(modified_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage_with_user(name: &str) -> RelayStorage {
        let storage = RelayStorage::in_memory().unwrap();
        storage.insert_user(name, "hash", 0).unwrap();
        storage
    }

    fn object(id: &str, encrypted: &str) -> IncomingObject {
        IncomingObject {
            id: id.to_string(),
            data: json!({"id": id, "version": 1, "encrypted": encrypted}),
        }
    }

    #[test]
    fn test_duplicate_user_is_a_conflict() {
        let storage = storage_with_user("alice");
        assert!(matches!(
            storage.insert_user("alice", "other", 1),
            Err(RelayError::Conflict(_))
        ));
        assert_eq!(storage.password_hash("alice").unwrap().as_deref(), Some("hash"));
        assert_eq!(storage.password_hash("bob").unwrap(), None);
    }

    #[test]
    fn test_tokens_are_scoped_to_their_user() {
        let storage = storage_with_user("alice");
        storage.insert_user("bob", "hash", 0).unwrap();
        storage.insert_token("t1", "alice", 0).unwrap();

        assert_eq!(storage.token_user("t1").unwrap().as_deref(), Some("alice"));
        assert!(!storage.delete_token("bob", "t1").unwrap());
        assert!(storage.delete_token("alice", "t1").unwrap());
        assert_eq!(storage.token_user("t1").unwrap(), None);
    }

    #[test]
    fn test_batches_are_strictly_ordered() {
        let storage = storage_with_user("alice");

        let first = storage
            .put_objects("alice", &[object("a", "00"), object("b", "01")], 1_000)
            .unwrap();
        assert_eq!(first, 1_000);

        // Clock stepped back: the stamp still moves forward
        let second = storage.put_objects("alice", &[object("a", "02")], 900).unwrap();
        assert_eq!(second, 1_001);

        let all = storage.objects_since("alice", 0).unwrap();
        let ids: Vec<&str> = all.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(all[1].data["encrypted"], "02");

        let newer = storage.objects_since("alice", first).unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].modified_at, second);
    }

    #[test]
    fn test_empty_batch_keeps_stamp() {
        let storage = storage_with_user("alice");
        assert_eq!(storage.put_objects("alice", &[], 5_000).unwrap(), 0);

        storage.put_objects("alice", &[object("a", "00")], 5_000).unwrap();
        assert_eq!(storage.put_objects("alice", &[], 9_000).unwrap(), 5_000);
    }

    #[test]
    fn test_users_do_not_see_each_other() {
        let storage = storage_with_user("alice");
        storage.insert_user("bob", "hash", 0).unwrap();
        storage.put_objects("alice", &[object("a", "00")], 10).unwrap();

        assert!(storage.objects_since("bob", 0).unwrap().is_empty());
        assert_eq!(storage.objects_since("alice", 0).unwrap().len(), 1);
    }
}
