//! One-time conversion of legacy per-field records.
//!
//! Older versions stored every field of a site separately encrypted under
//! `derivepass/production/<uuid>`. Each entry that decrypts under the
//! session keys is rewritten as a single current-format record with a new
//! id and its legacy key is deleted, so running again finds nothing.

use crate::crypto::{decrypt_legacy_string, encrypt_record, CryptoError, DerivedKeys};
use crate::models::{new_record_id, SiteRecord, StoredRecord, ValidationError};
use crate::store::{LocalStore, Mutation, Origin, StorageError, LEGACY_PREFIX};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why one legacy entry was left in place
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("malformed legacy entry: {0}")]
    Parse(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A legacy entry as persisted; every string field is ciphertext. The
/// legacy `uuid` is not carried over.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    changed_at: i64,
    #[serde(default)]
    removed: bool,
    domain: String,
    login: String,
    revision: String,
    options: String,
}

/// Decrypted contents of the `options` field
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyOptions {
    allowed: String,
    required: String,
    /// A number, or a numeric string in the oldest records
    max_length: serde_json::Value,
}

pub struct LegacyMigrator {
    store: Arc<LocalStore>,
}

impl LegacyMigrator {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Migrate every legacy entry readable with `keys`
    ///
    /// Entries that are tombstoned, unreadable or invalid are left alone.
    /// Returns the number of records migrated.
    pub fn run(&self, keys: &DerivedKeys) -> Result<usize, StorageError> {
        let storage = self.store.storage().clone();
        let mut migrated = 0;

        for key in storage.keys_with_prefix(LEGACY_PREFIX)? {
            match self.migrate_entry(keys, &key) {
                Ok(true) => migrated += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %key, "legacy entry not migrated: {}", e),
            }
        }

        if migrated > 0 {
            info!("migrated {} legacy records", migrated);
        }
        Ok(migrated)
    }

    fn migrate_entry(&self, keys: &DerivedKeys, key: &str) -> Result<bool, MigrationError> {
        let storage = self.store.storage();
        let Some(json) = storage.get(key)? else {
            return Ok(false);
        };

        let legacy: LegacyRecord =
            serde_json::from_str(&json).map_err(|e| MigrationError::Parse(e.to_string()))?;
        if legacy.removed {
            debug!(key = %key, "skipping removed legacy entry");
            return Ok(false);
        }

        let site = decrypt_legacy(keys, &legacy)?.validate()?;
        let encrypted = encrypt_record(keys, &site)?;

        self.store.update(|batch| {
            let modified_at = batch.clock().next_at(legacy.changed_at);
            batch.apply(
                Origin::Local,
                vec![Mutation::Put(StoredRecord::new(
                    new_record_id(),
                    encrypted,
                    modified_at,
                ))],
            );
        })?;
        storage.remove(key)?;

        Ok(true)
    }
}

fn decrypt_legacy(keys: &DerivedKeys, legacy: &LegacyRecord) -> Result<SiteRecord, MigrationError> {
    let domain = decrypt_legacy_string(keys, &legacy.domain)?;
    let login = decrypt_legacy_string(keys, &legacy.login)?;
    let revision = decrypt_legacy_string(keys, &legacy.revision)?;
    let options = decrypt_legacy_string(keys, &legacy.options)?;

    let options: LegacyOptions =
        serde_json::from_str(&options).map_err(|e| MigrationError::Parse(e.to_string()))?;

    let revision = parse_leading_int(&revision)
        .and_then(positive)
        .ok_or_else(|| MigrationError::Parse(format!("bad revision {:?}", revision)))?;

    let password_len = match &options.max_length {
        serde_json::Value::Number(n) => n
            .as_f64()
            .filter(|v| v.fract() == 0.0 && *v <= f64::from(u32::MAX))
            .and_then(|v| positive(v as i64)),
        serde_json::Value::String(s) => parse_leading_int(s).and_then(positive),
        _ => None,
    }
    .ok_or_else(|| MigrationError::Parse(format!("bad maxLength {}", options.max_length)))?;

    Ok(SiteRecord {
        domain,
        login,
        revision,
        allowed_chars: options.allowed,
        required_chars: options.required,
        password_len,
    })
}

fn positive(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v >= 1)
}

/// Leading base-10 integer of `s`, ignoring anything after the digits
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let value: i64 = digits[..end].parse().ok()?;

    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::tests::test_keys;
    use crate::crypto::cipher::{encrypt, encrypt_legacy_unauthenticated};
    use crate::crypto::decrypt_record;
    use crate::store::{KeyValueStore, MemoryStorage};
    use serde_json::json;

    fn v1(keys: &DerivedKeys, value: &str) -> String {
        format!("v1:{}", encrypt(keys, value.as_bytes()).unwrap())
    }

    fn legacy_entry(keys: &DerivedKeys, revision: &str, max_length: serde_json::Value) -> String {
        let options = json!({"allowed": "a-z0-9", "required": "0-9", "maxLength": max_length});
        json!({
            "uuid": "00000000-0000-0000-0000-000000000001",
            "changedAt": 1_500_000_000_000i64,
            "removed": false,
            "domain": v1(keys, "example.com"),
            "login": encrypt_legacy_unauthenticated(keys, "alice"),
            "revision": encrypt_legacy_unauthenticated(keys, revision),
            "options": v1(keys, &options.to_string()),
        })
        .to_string()
    }

    fn setup() -> (Arc<MemoryStorage>, Arc<LocalStore>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(LocalStore::open(storage.clone()).unwrap());
        (storage, store)
    }

    #[test]
    fn test_migrates_mixed_field_formats() {
        let keys = test_keys(3);
        let (storage, store) = setup();
        let key = format!("{}one", LEGACY_PREFIX);
        storage.set(&key, &legacy_entry(&keys, "2", json!(18))).unwrap();

        let migrator = LegacyMigrator::new(store.clone());
        assert_eq!(migrator.run(&keys).unwrap(), 1);
        assert!(storage.get(&key).unwrap().is_none());

        let records = store.snapshot();
        assert_eq!(records.len(), 1);
        let record = &records[0].record;
        assert_ne!(record.id, "00000000-0000-0000-0000-000000000001");
        assert_eq!(record.modified_at, 1_500_000_000_000);

        let site = decrypt_record(&keys, &record.encrypted).unwrap();
        assert_eq!(site.domain, "example.com");
        assert_eq!(site.login, "alice");
        assert_eq!(site.revision, 2);
        assert_eq!(site.allowed_chars, "a-z0-9");
        assert_eq!(site.required_chars, "0-9");
        assert_eq!(site.password_len, 18);

        // Second run has nothing left to do
        assert_eq!(migrator.run(&keys).unwrap(), 0);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_numeric_strings_parse_like_leading_integers() {
        let keys = test_keys(3);
        let (storage, store) = setup();
        storage
            .set(
                &format!("{}one", LEGACY_PREFIX),
                &legacy_entry(&keys, " 3rd", json!("24 chars")),
            )
            .unwrap();

        assert_eq!(LegacyMigrator::new(store.clone()).run(&keys).unwrap(), 1);

        let site = decrypt_record(&keys, &store.snapshot()[0].record.encrypted).unwrap();
        assert_eq!(site.revision, 3);
        assert_eq!(site.password_len, 24);
    }

    #[test]
    fn test_invalid_entries_are_left_in_place() {
        let keys = test_keys(3);
        let (storage, store) = setup();
        let bad = [
            legacy_entry(&keys, "0", json!(10)),
            legacy_entry(&keys, "abc", json!(10)),
            legacy_entry(&keys, "1", json!(-4)),
            legacy_entry(&keys, "1", json!("NaN")),
            legacy_entry(&keys, "1", json!(true)),
            "{not json".to_string(),
        ];
        for (i, entry) in bad.iter().enumerate() {
            storage.set(&format!("{}{}", LEGACY_PREFIX, i), entry).unwrap();
        }

        assert_eq!(LegacyMigrator::new(store.clone()).run(&keys).unwrap(), 0);
        assert!(store.snapshot().is_empty());
        assert_eq!(storage.keys_with_prefix(LEGACY_PREFIX).unwrap().len(), bad.len());
    }

    #[test]
    fn test_removed_and_foreign_entries_are_skipped() {
        let keys = test_keys(3);
        let (storage, store) = setup();

        let mut removed: serde_json::Value =
            serde_json::from_str(&legacy_entry(&keys, "1", json!(10))).unwrap();
        removed["removed"] = json!(true);
        storage
            .set(&format!("{}removed", LEGACY_PREFIX), &removed.to_string())
            .unwrap();

        // Encrypted under someone else's keys
        storage
            .set(
                &format!("{}foreign", LEGACY_PREFIX),
                &legacy_entry(&test_keys(4), "1", json!(10)),
            )
            .unwrap();

        assert_eq!(LegacyMigrator::new(store.clone()).run(&keys).unwrap(), 0);
        assert_eq!(storage.keys_with_prefix(LEGACY_PREFIX).unwrap().len(), 2);
    }

    #[test]
    fn test_migrated_record_stays_ahead_of_clock() {
        let keys = test_keys(3);
        let (storage, store) = setup();
        let latest = store.next_modified_at();

        storage
            .set(
                &format!("{}one", LEGACY_PREFIX),
                &legacy_entry(&keys, "1", json!(10)),
            )
            .unwrap();
        LegacyMigrator::new(store.clone()).run(&keys).unwrap();

        assert!(store.snapshot()[0].modified_at() > latest);
    }

    #[test]
    fn test_parse_leading_int() {
        assert_eq!(parse_leading_int("42"), Some(42));
        assert_eq!(parse_leading_int("  7px"), Some(7));
        assert_eq!(parse_leading_int("-3"), Some(-3));
        assert_eq!(parse_leading_int("+5"), Some(5));
        assert_eq!(parse_leading_int("x1"), None);
        assert_eq!(parse_leading_int(""), None);
        assert_eq!(parse_leading_int("-"), None);
    }
}
