use super::*;
use crate::crypto::cipher::encrypt_legacy_unauthenticated;
use crate::crypto::{compute_keys, compute_password};
use crate::store::{MemoryStorage, StorageError, LEGACY_PREFIX};
use serde_json::json;
use std::time::Duration;

const MASTER: &str = "correct horse";

fn site(domain: &str, login: &str) -> SiteRecord {
    SiteRecord {
        domain: domain.to_string(),
        login: login.to_string(),
        revision: 1,
        allowed_chars: "a-zA-Z0-9".to_string(),
        required_chars: "0-9".to_string(),
        password_len: 16,
    }
}

fn no_autolock() -> ClientConfig {
    ClientConfig {
        auto_lock_secs: 0,
        ..ClientConfig::default()
    }
}

fn open(storage: &Arc<MemoryStorage>, config: &ClientConfig) -> Vault {
    Vault::open(storage.clone(), config).unwrap()
}

#[tokio::test]
async fn test_locked_vault_refuses_operations() {
    let storage = Arc::new(MemoryStorage::new());
    let vault = open(&storage, &no_autolock());

    assert!(!vault.is_unlocked());
    assert!(matches!(vault.sites(), Err(Error::VaultLocked)));
    assert!(matches!(
        vault.add_site(site("example.com", "alice")),
        Err(Error::VaultLocked)
    ));
    assert!(matches!(
        vault.unlock(MasterSecret::new("")).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_site_lifecycle_and_relock() {
    let storage = Arc::new(MemoryStorage::new());
    let vault = open(&storage, &no_autolock());
    vault.unlock(MasterSecret::new(MASTER)).await.unwrap();

    let b = vault.add_site(site("b.example", "bob")).unwrap();
    let a = vault.add_site(site("a.example", "alice")).unwrap();

    let sites = vault.sites().unwrap();
    let order: Vec<&str> = sites.iter().map(|s| s.id()).collect();
    assert_eq!(order, vec![a.as_str(), b.as_str()]);

    let before = vault.site(&b).unwrap().modified_at();
    vault.update_site(&b, site("b.example", "bobby")).unwrap();
    let updated = vault.site(&b).unwrap();
    assert!(updated.modified_at() > before);
    assert_eq!(updated.decrypted.unwrap().login, "bobby");

    vault.remove_site(&a).unwrap();
    assert_eq!(vault.sites().unwrap().len(), 1);
    assert!(matches!(vault.site(&a), Err(Error::NotFound(_))));
    assert!(matches!(vault.remove_site(&a), Err(Error::NotFound(_))));
    assert!(vault.store().get(&a).unwrap().record.is_removed());

    vault.lock();
    assert!(!vault.is_unlocked());
    assert!(vault.store().snapshot().iter().all(|r| r.decrypted.is_none()));

    vault.unlock(MasterSecret::new(MASTER)).await.unwrap();
    assert_eq!(
        vault.site(&b).unwrap().decrypted.unwrap().login,
        "bobby"
    );
}

#[tokio::test]
async fn test_invalid_site_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let vault = open(&storage, &no_autolock());
    vault.unlock(MasterSecret::new(MASTER)).await.unwrap();

    let err = vault.add_site(site("www.example.com", "alice")).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(vault.sites().unwrap().is_empty());
}

#[tokio::test]
async fn test_password_for_matches_direct_derivation() {
    let storage = Arc::new(MemoryStorage::new());
    let vault = open(&storage, &no_autolock());
    vault.unlock(MasterSecret::new(MASTER)).await.unwrap();

    let id = vault.add_site(site("example.com", "alice")).unwrap();
    let password = vault.password_for(&id).await.unwrap();

    let expected =
        compute_password(&MasterSecret::new(MASTER), &site("example.com", "alice")).unwrap();
    assert_eq!(password, expected);
    assert_eq!(
        vault
            .password_for_site(site(" example.com ", "alice"))
            .await
            .unwrap(),
        expected
    );
}

#[tokio::test]
async fn test_records_survive_reopen_and_wrong_master() {
    let storage = Arc::new(MemoryStorage::new());
    let id = {
        let vault = open(&storage, &no_autolock());
        vault.unlock(MasterSecret::new(MASTER)).await.unwrap();
        vault.add_site(site("example.com", "alice")).unwrap()
    };

    let vault = open(&storage, &no_autolock());
    vault.unlock(MasterSecret::new("wrong horse")).await.unwrap();

    // Present but unreadable, and never deleted
    let record = vault.site(&id).unwrap();
    assert!(record.decrypted.is_none());
    assert!(vault.password_for(&id).await.is_err());

    vault.lock();
    vault.unlock(MasterSecret::new(MASTER)).await.unwrap();
    assert!(vault.site(&id).unwrap().decrypted.is_some());
}

#[tokio::test]
async fn test_unlock_migrates_legacy_records() {
    let storage = Arc::new(MemoryStorage::new());
    let keys = compute_keys(&MasterSecret::new(MASTER)).unwrap();

    let options = json!({"allowed": "a-z", "required": "", "maxLength": 20}).to_string();
    let entry = json!({
        "uuid": "legacy-1",
        "changedAt": 1_400_000_000_000i64,
        "removed": false,
        "domain": encrypt_legacy_unauthenticated(&keys, "old.example"),
        "login": encrypt_legacy_unauthenticated(&keys, "alice"),
        "revision": encrypt_legacy_unauthenticated(&keys, "1"),
        "options": encrypt_legacy_unauthenticated(&keys, &options),
    });
    let key = format!("{}legacy-1", LEGACY_PREFIX);
    storage.set(&key, &entry.to_string()).unwrap();

    let vault = open(&storage, &no_autolock());
    assert_eq!(vault.unlock(MasterSecret::new(MASTER)).await.unwrap(), 1);
    assert!(storage.get(&key).unwrap().is_none());

    let sites = vault.sites().unwrap();
    assert_eq!(sites.len(), 1);
    let migrated = sites[0].decrypted.clone().unwrap();
    assert_eq!(migrated.domain, "old.example");
    assert_eq!(migrated.password_len, 20);

    // A second unlock finds nothing left
    vault.lock();
    assert_eq!(vault.unlock(MasterSecret::new(MASTER)).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_auto_lock_after_inactivity() {
    let storage = Arc::new(MemoryStorage::new());
    let config = ClientConfig {
        auto_lock_secs: 300,
        ..ClientConfig::default()
    };
    let vault = open(&storage, &config);
    vault.unlock(MasterSecret::new(MASTER)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(200)).await;
    vault.sites().unwrap();

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(vault.is_unlocked());

    tokio::time::sleep(Duration::from_secs(150)).await;
    assert!(!vault.is_unlocked());
    assert!(matches!(vault.sites(), Err(Error::VaultLocked)));

    // Unlocking again re-arms the timer
    vault.unlock(MasterSecret::new(MASTER)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(301)).await;
    assert!(!vault.is_unlocked());
}

/// Storage that cannot list legacy entries
#[derive(Default)]
struct BrokenLegacyScan(MemoryStorage);

impl KeyValueStore for BrokenLegacyScan {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, StorageError> {
        self.0.get(key)
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), StorageError> {
        self.0.set(key, value)
    }

    fn remove(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.0.remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> std::result::Result<Vec<String>, StorageError> {
        if prefix == LEGACY_PREFIX {
            return Err(StorageError::Io(std::io::Error::other("scan failed")));
        }
        self.0.keys_with_prefix(prefix)
    }
}

#[tokio::test]
async fn test_failed_migration_leaves_vault_locked() {
    let vault = Vault::open(Arc::new(BrokenLegacyScan::default()), &ClientConfig::default()).unwrap();

    assert!(matches!(
        vault.unlock(MasterSecret::new(MASTER)).await,
        Err(Error::Storage(_))
    ));
    assert!(!vault.is_unlocked());
    assert!(vault.store().keys().is_none());
    assert!(matches!(vault.sites(), Err(Error::VaultLocked)));
}
