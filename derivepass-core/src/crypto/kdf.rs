//! scrypt key derivation for the master secret.
//!
//! Uses scrypt with parameters frozen for compatibility:
//! - N: 32768 (log2 = 15)
//! - r: 8
//! - p: 4
//!
//! Changing any of these silently changes every derived password.

use crate::crypto::keys::{DerivedKeys, MasterSecret, AES_KEY_SIZE, MAC_KEY_SIZE};
use crate::crypto::{CryptoError, Result};
use scrypt::Params;

/// log2 of the scrypt CPU/memory cost
pub const SCRYPT_LOG_N: u8 = 15;

/// scrypt block size
pub const SCRYPT_R: u32 = 8;

/// scrypt parallelism
pub const SCRYPT_P: u32 = 4;

/// Domain separation salt for the record encryption keys
pub const AES_DOMAIN: &[u8] = b"derivepass/aes";

fn params() -> Result<Params> {
    // The length argument only matters for PHC strings; raw output
    // length is taken from the destination buffer.
    Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, Params::RECOMMENDED_LEN)
        .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))
}

/// Derive `out_len` bytes from `secret` salted with `salt`
///
/// A zero-length request yields an empty buffer without running the KDF.
pub fn derive_bytes(secret: &[u8], salt: &[u8], out_len: usize) -> Result<Vec<u8>> {
    if out_len == 0 {
        return Ok(Vec::new());
    }

    let params = params()?;
    let mut out = vec![0u8; out_len];
    scrypt::scrypt(secret, salt, &params, &mut out)
        .map_err(|e| CryptoError::KdfFailed(format!("Hashing failed: {}", e)))?;

    Ok(out)
}

/// Stretch the master secret into record encryption and MAC keys
///
/// Pure function of `master`: the same secret always yields the same keys.
pub fn compute_keys(master: &MasterSecret) -> Result<DerivedKeys> {
    let mut buf = derive_bytes(master.as_bytes(), AES_DOMAIN, AES_KEY_SIZE + MAC_KEY_SIZE)?;

    let mut aes_key = [0u8; AES_KEY_SIZE];
    let mut mac_key = [0u8; MAC_KEY_SIZE];
    aes_key.copy_from_slice(&buf[..AES_KEY_SIZE]);
    mac_key.copy_from_slice(&buf[AES_KEY_SIZE..]);

    zeroize::Zeroize::zeroize(&mut buf);

    Ok(DerivedKeys::from_parts(master.clone(), aes_key, mac_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_valid() {
        assert!(params().is_ok());
    }

    #[test]
    fn test_compute_keys_is_deterministic() {
        let master = MasterSecret::new("correct horse");

        let keys1 = compute_keys(&master).unwrap();
        let keys2 = compute_keys(&master).unwrap();

        assert_eq!(keys1, keys2);
        assert_eq!(keys1.aes_key().len(), 32);
        assert_eq!(keys1.mac_key().len(), 64);

        let other = compute_keys(&MasterSecret::new("battery staple")).unwrap();
        assert_ne!(keys1.aes_key(), other.aes_key());
    }

    #[test]
    fn test_salts_are_independent() {
        let a = derive_bytes(b"secret", b"example.com/alice", 16).unwrap();
        let b = derive_bytes(b"secret", b"example.com/alice#2", 16).unwrap();
        let c = derive_bytes(b"secret", b"example.com/alice", 16).unwrap();

        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_zero_length_skips_kdf() {
        assert!(derive_bytes(b"secret", b"salt", 0).unwrap().is_empty());
    }

    #[test]
    fn test_output_prefix_is_stable() {
        // scrypt output for a shorter length is a prefix of the longer one
        let short = derive_bytes(b"secret", b"salt", 8).unwrap();
        let long = derive_bytes(b"secret", b"salt", 24).unwrap();
        assert_eq!(&long[..8], &short[..]);
    }
}
