//! The authoritative local record set.
//!
//! `LocalStore` owns the record set, the `modifiedAt` clock and the
//! session keys behind one lock. Every update runs as a single atomic
//! batch: mutations are applied and changed records are written to
//! storage under the lock, then subscribers are notified after it is
//! released. A batch that cannot be written is rolled back in memory.

use crate::crypto::DerivedKeys;
use crate::models::{HydratedRecord, StoredRecord};
use crate::store::clock::ModifiedAtClock;
use crate::store::record_set::{Mutation, Origin, RecordSet, Transition};
use crate::store::{item_key, KeyValueStore, StorageError, ITEM_PREFIX};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Receives every non-empty transition of a [`LocalStore`]
pub trait RecordObserver: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}

struct Inner {
    set: RecordSet,
    clock: ModifiedAtClock,
    keys: Option<DerivedKeys>,
}

/// Exclusive access to the record set for one atomic update
pub struct Batch<'a> {
    set: &'a mut RecordSet,
    clock: &'a mut ModifiedAtClock,
    keys: Option<&'a DerivedKeys>,
    transition: Transition,
    /// Entries as they were before this batch first touched them
    undo: Vec<(String, Option<HydratedRecord>)>,
}

impl Batch<'_> {
    pub fn records(&self) -> &RecordSet {
        self.set
    }

    pub fn clock(&mut self) -> &mut ModifiedAtClock {
        self.clock
    }

    /// Issue a fresh `modifiedAt`
    pub fn next_modified_at(&mut self) -> i64 {
        self.clock.next()
    }

    /// Apply mutations now; later reads in this batch see the result
    pub fn apply(&mut self, origin: Origin, mutations: Vec<Mutation>) {
        for mutation in &mutations {
            let id = mutation.id();
            if !self.undo.iter().any(|(seen, _)| seen == id) {
                self.undo.push((id.to_string(), self.set.get(id).cloned()));
            }
        }

        let transition = self.set.apply(origin, mutations, self.keys);
        for change in &transition.changes {
            self.clock.observe(change.record.modified_at);
        }
        self.transition.changes.extend(transition.changes);
    }
}

pub struct LocalStore {
    storage: Arc<dyn KeyValueStore>,
    inner: Mutex<Inner>,
    observers: RwLock<Vec<Arc<dyn RecordObserver>>>,
}

impl LocalStore {
    /// Load every persisted record
    ///
    /// Entries that fail to parse or validate are skipped. The clock
    /// starts after the highest `modifiedAt` found.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let mut records = Vec::new();

        for key in storage.keys_with_prefix(ITEM_PREFIX)? {
            let Some(value) = storage.get(&key)? else {
                continue;
            };
            match StoredRecord::from_json(&value) {
                Ok(record) => records.push(Mutation::Put(record)),
                Err(e) => debug!(key = %key, "skipping invalid record: {}", e),
            }
        }

        let mut set = RecordSet::new();
        set.apply(Origin::Local, records, None);
        info!("loaded {} records", set.len());

        let clock = ModifiedAtClock::starting_after(set.max_modified_at());

        Ok(Self {
            storage,
            inner: Mutex::new(Inner {
                set,
                clock,
                keys: None,
            }),
            observers: RwLock::new(Vec::new()),
        })
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        // A panic mid-update leaves the set consistent; keep going
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an observer for future transitions
    pub fn subscribe(&self, observer: Arc<dyn RecordObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Run one atomic batch against the record set
    ///
    /// `f` reads the set and applies mutations through the [`Batch`]; the
    /// value it returns is handed back to the caller. Changed records are
    /// written before the lock is released, so storage sees batches in the
    /// same order as memory. If the write fails the batch is undone and the
    /// error returned; observers only see persisted transitions.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut Batch<'_>) -> R,
    ) -> Result<(R, Transition), StorageError> {
        let mut guard = self.inner();
        let Inner { set, clock, keys } = &mut *guard;

        let mut batch = Batch {
            set: &mut *set,
            clock,
            keys: keys.as_ref(),
            transition: Transition::default(),
            undo: Vec::new(),
        };
        let value = f(&mut batch);
        let Batch {
            transition, undo, ..
        } = batch;

        if transition.is_empty() {
            return Ok((value, transition));
        }

        if let Err(e) = self.persist(&transition) {
            warn!("rolling back {} unsaved changes: {}", transition.changes.len(), e);
            for (id, previous) in undo {
                set.restore(id, previous);
            }
            return Err(e);
        }
        drop(guard);

        self.notify(&transition);
        Ok((value, transition))
    }

    /// Apply `mutations` as a single batch from `origin`
    pub fn apply(
        &self,
        origin: Origin,
        mutations: Vec<Mutation>,
    ) -> Result<Transition, StorageError> {
        self.update(|batch| batch.apply(origin, mutations))
            .map(|(_, transition)| transition)
    }

    fn persist(&self, transition: &Transition) -> Result<(), StorageError> {
        let entries = transition
            .changes
            .iter()
            .map(|change| -> Result<(String, String), StorageError> {
                Ok((
                    item_key(&change.record.id),
                    serde_json::to_string(&change.record)?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.storage.set_many(&entries)
    }

    fn notify(&self, transition: &Transition) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer.on_transition(transition);
        }
    }

    /// Read the set and clock together, under one lock
    pub fn read<R>(&self, f: impl FnOnce(&RecordSet, &ModifiedAtClock) -> R) -> R {
        let guard = self.inner();
        f(&guard.set, &guard.clock)
    }

    pub fn snapshot(&self) -> Vec<HydratedRecord> {
        self.read(|set, _| set.iter().cloned().collect())
    }

    pub fn get(&self, id: &str) -> Option<HydratedRecord> {
        self.read(|set, _| set.get(id).cloned())
    }

    /// Issue a fresh `modifiedAt`
    pub fn next_modified_at(&self) -> i64 {
        self.inner().clock.next()
    }

    pub fn last_modified_at(&self) -> i64 {
        self.inner().clock.last_issued()
    }

    /// Install or clear the session keys
    ///
    /// Every record is re-decrypted with the new keys; clearing them erases
    /// all plaintext.
    pub fn set_keys(&self, keys: Option<DerivedKeys>) {
        let mut guard = self.inner();
        guard.set.rehydrate(keys.as_ref());
        guard.keys = keys;
    }

    pub fn keys(&self) -> Option<DerivedKeys> {
        self.inner().keys.clone()
    }

    pub fn has_keys(&self) -> bool {
        self.inner().keys.is_some()
    }
}
