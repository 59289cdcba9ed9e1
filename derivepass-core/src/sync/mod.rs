//! Remote synchronization for derivepass.
//!
//! Implements record sync against an untrusted object store:
//! - Pull of objects newer than the consumed remote watermark
//! - Batched push of local-only changes in `modifiedAt` order
//! - Local-edit-wins protection for records changed during a cycle
//! - Credential discard on 401/403
//! - Coalesced triggering with at most one cycle in flight
//!
//! The remote store only ever sees ciphertext.

#[cfg(feature = "sync")]
pub mod client;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod models;
pub mod scheduler;


#[cfg(feature = "sync")]
pub use client::HttpTransport;
pub use config::SyncStateStore;
pub use conflict::{ConflictResolver, Resolution};
pub use engine::{CycleReport, RemoteSyncEngine, RemoteTransport, SyncStatus};
pub use models::{PushObject, RemoteData, RemoteObject};
pub use scheduler::{SyncScheduler, SyncTrigger};

use crate::store::StorageError;
use thiserror::Error;

/// Errors from a sync operation
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote rejected our credentials
    #[error("Remote rejected credentials (HTTP {0})")]
    Auth(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error (HTTP {0})")]
    Remote(u16),

    #[error("Invalid remote payload: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sync is not linked to a remote")]
    NotLinked,
}

impl SyncError {
    /// Map a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth(status),
            _ => Self::Remote(status),
        }
    }
}
