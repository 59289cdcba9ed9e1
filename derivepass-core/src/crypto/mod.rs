//! Cryptographic primitives for derivepass.
//!
//! This module provides:
//! - scrypt key and password-byte derivation with frozen work factors
//! - encrypt-then-MAC record encryption (AES-256-CBC + HMAC-SHA256)
//! - deterministic password construction from derived bytes
//! - an off-thread worker for the expensive KDF calls

pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod password;
pub mod worker;

pub use cipher::{decrypt_legacy_string, decrypt_record, encrypt_record};
pub use kdf::{compute_keys, derive_bytes};
pub use keys::{DerivedKeys, MasterSecret};
pub use password::compute_password;
pub use worker::CryptoWorker;

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Crypto worker is not running")]
    WorkerStopped,
}

impl CryptoError {
    /// Whether the failure means "wrong or rotated key" rather than a broken call.
    pub fn is_undecryptable(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::DecryptionFailed(_) | Self::InvalidHex(_)
        )
    }
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
