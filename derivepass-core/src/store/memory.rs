//! In-process key/value storage for tests and ephemeral sessions.

use crate::store::{KeyValueStore, StorageError};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryStorage {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.map.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.map()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.map()?.remove(key);
        Ok(())
    }

    fn set_many(&self, entries: &[(String, String)]) -> Result<(), StorageError> {
        let mut map = self.map()?;
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .map()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_scan() {
        let storage = MemoryStorage::new();
        storage.set("a/1", "x").unwrap();
        storage.set("a/2", "y").unwrap();
        storage.set("b/1", "z").unwrap();

        assert_eq!(storage.keys_with_prefix("a/").unwrap(), vec!["a/1", "a/2"]);
        assert!(storage.keys_with_prefix("c/").unwrap().is_empty());
    }
}
