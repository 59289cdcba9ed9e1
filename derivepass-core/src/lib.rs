//! derivepass core library
//!
//! Deterministic site password derivation from a single master secret,
//! plus an encrypted, multi-device synchronized store of per-site options.
//! Nothing in this crate persists the master secret or a derived password.

pub mod config;
pub mod crypto;
pub mod migrator;
pub mod models;
pub mod platform;
pub mod presets;
pub mod ranges;
pub mod store;
pub mod sync;
pub mod vault;

pub use config::ClientConfig;
pub use crypto::{
    compute_keys, compute_password, decrypt_legacy_string, decrypt_record, encrypt_record,
    CryptoError, CryptoWorker, DerivedKeys, MasterSecret,
};
pub use migrator::LegacyMigrator;
pub use models::{HydratedRecord, SiteRecord, StoredRecord, SyncState, ValidationError};
pub use presets::PasswordOptions;
pub use store::{KeyValueStore, LocalStore, MemoryStorage, SqliteStorage, StorageError};
pub use sync::{RemoteSyncEngine, SyncError, SyncScheduler};
pub use vault::Vault;

use thiserror::Error;

/// Result type for derivepass operations
pub type Result<T> = std::result::Result<T, Error>;

/// General error type for derivepass operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Validation error: {0}")]
    Validation(#[from] models::ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] store::StorageError),

    #[error("Sync error: {0}")]
    Sync(#[from] sync::SyncError),

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
