//! Vault management - coordinates key derivation, the record store and
//! the legacy migrator for one session.
//!
//! The master secret is never stored. Unlocking derives the session keys
//! on the crypto worker and installs them in the [`LocalStore`], which
//! decrypts every record; locking drops the keys and all plaintext with
//! them.

mod autolock;
#[cfg(test)]
mod tests;

pub use autolock::AutoLockManager;

use crate::config::ClientConfig;
use crate::crypto::{encrypt_record, CryptoWorker, DerivedKeys, MasterSecret};
use crate::migrator::LegacyMigrator;
use crate::models::{new_record_id, HydratedRecord, SiteRecord, StoredRecord, ValidationError};
use crate::store::{KeyValueStore, LocalStore, Mutation, Origin, SqliteStorage};
use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Session facade over the record store
///
/// Must be created inside a tokio runtime.
pub struct Vault {
    store: Arc<LocalStore>,
    worker: CryptoWorker,
    migrator: LegacyMigrator,
    autolock: Arc<Mutex<AutoLockManager>>,
    autolock_task: Mutex<Option<JoinHandle<()>>>,
}

impl Vault {
    /// Open the vault over `storage`, locked
    pub fn open(storage: Arc<dyn KeyValueStore>, config: &ClientConfig) -> Result<Self> {
        let store = Arc::new(LocalStore::open(storage)?);
        let autolock = match config.auto_lock() {
            Some(timeout) => AutoLockManager::new(timeout),
            None => AutoLockManager::disabled(),
        };

        Ok(Self {
            migrator: LegacyMigrator::new(store.clone()),
            store,
            worker: CryptoWorker::spawn(),
            autolock: Arc::new(Mutex::new(autolock)),
            autolock_task: Mutex::new(None),
        })
    }

    /// Open the SQLite-backed vault named by `config`
    pub fn open_default(config: &ClientConfig) -> Result<Self> {
        let storage = SqliteStorage::open(config.store_path())?;
        Self::open(Arc::new(storage), config)
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn worker(&self) -> &CryptoWorker {
        &self.worker
    }

    /// Derive the session keys and decrypt every record
    ///
    /// Legacy records readable with the new keys are migrated. Records that
    /// do not decrypt stay in the store, unreadable. Returns the number of
    /// migrated records. If storage fails during migration the vault is
    /// left locked.
    pub async fn unlock(&self, master: MasterSecret) -> Result<usize> {
        if master.is_empty() {
            return Err(ValidationError::field("master", "Master password can't be empty").into());
        }

        let keys = self.worker.compute_keys(master).await?;
        self.store.set_keys(Some(keys.clone()));
        let migrated = match self.migrator.run(&keys) {
            Ok(migrated) => migrated,
            Err(e) => {
                warn!("unlock aborted, legacy migration failed: {}", e);
                self.lock();
                return Err(e.into());
            }
        };

        self.touch();
        self.start_autolock();
        info!("Vault unlocked");

        Ok(migrated)
    }

    /// Drop the session keys and every decrypted record
    pub fn lock(&self) {
        if let Some(task) = self.autolock_task().take() {
            task.abort();
        }
        self.store.set_keys(None);
        info!("Vault locked");
    }

    pub fn is_unlocked(&self) -> bool {
        self.store.has_keys()
    }

    /// Validate, encrypt and store a new site, returning its id
    pub fn add_site(&self, site: SiteRecord) -> Result<String> {
        let keys = self.keys()?;
        let id = new_record_id();
        self.put(&keys, id.clone(), site)?;
        Ok(id)
    }

    /// Replace the options of an existing site
    pub fn update_site(&self, id: &str, site: SiteRecord) -> Result<()> {
        let keys = self.keys()?;
        self.live_record(id)?;
        self.put(&keys, id.to_string(), site)
    }

    /// Delete a site; a tombstone is kept so the deletion syncs
    pub fn remove_site(&self, id: &str) -> Result<()> {
        self.keys()?;
        self.live_record(id)?;

        self.store.update(|batch| {
            let modified_at = batch.next_modified_at();
            batch.apply(
                Origin::Local,
                vec![Mutation::Tombstone {
                    id: id.to_string(),
                    modified_at,
                }],
            );
        })?;
        Ok(())
    }

    /// Every live site, by domain then login
    ///
    /// Records the current keys cannot open are included with
    /// `decrypted: None`.
    pub fn sites(&self) -> Result<Vec<HydratedRecord>> {
        self.keys()?;

        let mut sites: Vec<HydratedRecord> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|r| !r.record.is_removed())
            .collect();
        sites.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        Ok(sites)
    }

    pub fn site(&self, id: &str) -> Result<HydratedRecord> {
        self.keys()?;
        self.live_record(id)
    }

    /// Derive the password of a stored site
    pub async fn password_for(&self, id: &str) -> Result<String> {
        let keys = self.keys()?;
        let site = self
            .live_record(id)?
            .decrypted
            .ok_or_else(|| Error::NotFound(format!("site {} is not readable with these keys", id)))?;

        self.worker.compute_password(&keys, &site).await
    }

    /// Derive a password for options that are not stored
    pub async fn password_for_site(&self, site: SiteRecord) -> Result<String> {
        let keys = self.keys()?;
        let site = site.validate()?;
        self.worker.compute_password(&keys, &site).await
    }

    fn keys(&self) -> Result<DerivedKeys> {
        let keys = self.store.keys().ok_or(Error::VaultLocked)?;
        self.touch();
        Ok(keys)
    }

    fn live_record(&self, id: &str) -> Result<HydratedRecord> {
        self.store
            .get(id)
            .filter(|r| !r.record.is_removed())
            .ok_or_else(|| Error::NotFound(format!("site {}", id)))
    }

    fn put(&self, keys: &DerivedKeys, id: String, site: SiteRecord) -> Result<()> {
        let site = site.validate()?;
        let encrypted = encrypt_record(keys, &site)?;

        self.store.update(|batch| {
            let modified_at = batch.next_modified_at();
            batch.apply(
                Origin::Local,
                vec![Mutation::Put(StoredRecord::new(id, encrypted, modified_at))],
            );
        })?;
        Ok(())
    }

    fn touch(&self) {
        self.autolock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_activity();
    }

    fn autolock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.autolock_task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_autolock(&self) {
        let enabled = self
            .autolock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_enabled();
        if !enabled {
            return;
        }

        let mut task = self.autolock_task();
        if let Some(old) = task.take() {
            old.abort();
        }
        *task = Some(autolock::spawn_auto_lock(
            self.store.clone(),
            self.autolock.clone(),
        ));
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        if let Some(task) = self.autolock_task().take() {
            task.abort();
        }
    }
}

fn sort_key(record: &HydratedRecord) -> (Option<&str>, Option<&str>, &str) {
    match &record.decrypted {
        Some(site) => (Some(site.domain.as_str()), Some(site.login.as_str()), record.id()),
        None => (None, None, record.id()),
    }
}
