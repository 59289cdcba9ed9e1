//! Local persistence for derivepass.
//!
//! Everything is kept in a flat, namespaced key/value store holding JSON
//! strings:
//! - `derivepass/v2/i:<id>`: one StoredRecord per id
//! - `derivepass/v2/remote-state`: the SyncState, when linked
//! - `derivepass/production/<uuid>`: legacy per-field records awaiting migration

pub mod clock;
pub mod local;
pub mod memory;
pub mod record_set;
pub mod sqlite;

pub use clock::ModifiedAtClock;
pub use local::{Batch, LocalStore, RecordObserver};
pub use memory::MemoryStorage;
pub use record_set::{Change, Mutation, Origin, RecordSet, Transition};
pub use sqlite::SqliteStorage;

use thiserror::Error;

/// Namespace shared by every current-format key
pub const STORAGE_PREFIX: &str = "derivepass/v2/";

/// Prefix of StoredRecord entries
pub const ITEM_PREFIX: &str = "derivepass/v2/i:";

/// Key of the persisted SyncState
pub const REMOTE_STATE_KEY: &str = "derivepass/v2/remote-state";

/// Prefix of legacy per-field records
pub const LEGACY_PREFIX: &str = "derivepass/production/";

/// Storage key for a record id
pub fn item_key(id: &str) -> String {
    format!("{}{}", ITEM_PREFIX, id)
}

/// Errors from the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat string key/value persistence
///
/// Implementations serialize access internally and can be shared across
/// threads behind an `Arc`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write several entries; backends that can do so apply them atomically
    fn set_many(&self, entries: &[(String, String)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// All keys starting with `prefix`, in ascending order
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
