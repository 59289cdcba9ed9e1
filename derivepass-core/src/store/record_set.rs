//! The in-memory record set and its transitions.
//!
//! Mutations are applied as a batch. The resulting [`Transition`] lists
//! only records whose `modifiedAt` actually changed, so re-applying a
//! record the set already holds produces an empty transition and no
//! downstream effects.

use crate::crypto::{decrypt_record, DerivedKeys};
use crate::models::{HydratedRecord, StoredRecord};
use std::collections::BTreeMap;
use tracing::debug;

/// Who caused a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A user edit or a migration on this device
    Local,
    /// An update received from the remote store
    Remote,
}

/// A single change to the record set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or replace the record with this id
    Put(StoredRecord),
    /// Mark a record deleted, keeping it for propagation
    Tombstone { id: String, modified_at: i64 },
}

impl Mutation {
    pub fn id(&self) -> &str {
        match self {
            Mutation::Put(record) => &record.id,
            Mutation::Tombstone { id, .. } => id,
        }
    }
}

/// A record whose stored form changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub origin: Origin,
    pub record: StoredRecord,
}

/// The stored-form differences produced by one batch of mutations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub changes: Vec<Change>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether any change came from this device
    pub fn has_local_changes(&self) -> bool {
        self.changes.iter().any(|c| c.origin == Origin::Local)
    }
}

/// Records by id
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: BTreeMap<String, HydratedRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&HydratedRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HydratedRecord> {
        self.records.values()
    }

    /// Highest `modifiedAt` held
    pub fn max_modified_at(&self) -> i64 {
        self.records
            .values()
            .map(|r| r.modified_at())
            .max()
            .unwrap_or(0)
    }

    /// Apply a batch of mutations, decrypting new records when keys are set
    pub fn apply(
        &mut self,
        origin: Origin,
        mutations: Vec<Mutation>,
        keys: Option<&DerivedKeys>,
    ) -> Transition {
        let mut transition = Transition::default();

        for mutation in mutations {
            let record = match mutation {
                Mutation::Put(record) => record,
                Mutation::Tombstone { id, modified_at } => StoredRecord::tombstone(id, modified_at),
            };

            if let Some(existing) = self.records.get(&record.id) {
                if existing.modified_at() == record.modified_at {
                    continue;
                }
            }

            let hydrated = hydrate(keys, record.clone());
            self.records.insert(record.id.clone(), hydrated);
            transition.changes.push(Change { origin, record });
        }

        transition
    }

    /// Put back an entry captured before a batch, removing it if it was absent
    pub fn restore(&mut self, id: String, previous: Option<HydratedRecord>) {
        match previous {
            Some(entry) => {
                self.records.insert(id, entry);
            }
            None => {
                self.records.remove(&id);
            }
        }
    }

    /// Re-derive every `decrypted` field for new keys, or erase them all
    pub fn rehydrate(&mut self, keys: Option<&DerivedKeys>) {
        for entry in self.records.values_mut() {
            entry.decrypted = None;
            if let Some(keys) = keys {
                *entry = hydrate(Some(keys), entry.record.clone());
            }
        }
    }
}

/// Attach plaintext to a stored record when the keys can open it
pub fn hydrate(keys: Option<&DerivedKeys>, record: StoredRecord) -> HydratedRecord {
    let mut hydrated = HydratedRecord::new(record);

    let keys = match keys {
        Some(keys) if !hydrated.record.is_removed() => keys,
        _ => return hydrated,
    };

    match decrypt_record(keys, &hydrated.record.encrypted) {
        Ok(site) => hydrated.decrypted = Some(site),
        Err(e) => debug!(id = %hydrated.record.id, "record not decryptable with current keys: {}", e),
    }

    hydrated
}
