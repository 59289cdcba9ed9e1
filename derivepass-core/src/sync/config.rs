//! Sync link state stored in the local key/value store.

use crate::models::SyncState;
use crate::store::{KeyValueStore, StorageError, REMOTE_STATE_KEY};
use std::sync::Arc;
use tracing::warn;

/// Loads and saves the [`SyncState`]; its absence means sync is disabled
#[derive(Clone)]
pub struct SyncStateStore {
    storage: Arc<dyn KeyValueStore>,
}

impl SyncStateStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Load the sync state. An unreadable value counts as unlinked.
    pub fn load(&self) -> Result<Option<SyncState>, StorageError> {
        let Some(json) = self.storage.get(REMOTE_STATE_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!("ignoring unreadable sync state: {}", e);
                Ok(None)
            }
        }
    }

    /// Save the sync state (upsert)
    pub fn save(&self, state: &SyncState) -> Result<(), StorageError> {
        let json = serde_json::to_string(state)?;
        self.storage.set(REMOTE_STATE_KEY, &json)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(REMOTE_STATE_KEY)
    }
}
