//! Session key material.
//!
//! Master Secret → scrypt("derivepass/aes") → AES key (32) || MAC key (64)
//!
//! Neither type is ever persisted. Both are wiped from memory on drop.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the record encryption key in bytes
pub const AES_KEY_SIZE: usize = 32;

/// Size of the record authentication key in bytes
pub const MAC_KEY_SIZE: usize = 64;

/// The memorized secret, held only for the lifetime of a session
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret(String);

impl MasterSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for MasterSecret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MasterSecret {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

/// Keys derived from the master secret.
///
/// `master` is kept alongside the record keys because every password
/// derivation re-runs the KDF against it with a per-site salt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    master: MasterSecret,
    aes_key: [u8; AES_KEY_SIZE],
    mac_key: [u8; MAC_KEY_SIZE],
}

impl DerivedKeys {
    /// Assemble keys from raw parts (use with caution)
    pub fn from_parts(
        master: MasterSecret,
        aes_key: [u8; AES_KEY_SIZE],
        mac_key: [u8; MAC_KEY_SIZE],
    ) -> Self {
        Self {
            master,
            aes_key,
            mac_key,
        }
    }

    pub fn master(&self) -> &MasterSecret {
        &self.master
    }

    pub fn aes_key(&self) -> &[u8; AES_KEY_SIZE] {
        &self.aes_key
    }

    pub fn mac_key(&self) -> &[u8; MAC_KEY_SIZE] {
        &self.mac_key
    }
}

impl PartialEq for DerivedKeys {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        let aes: bool = self.aes_key.as_slice().ct_eq(other.aes_key.as_slice()).into();
        let mac: bool = self.mac_key.as_slice().ct_eq(other.mac_key.as_slice()).into();
        aes && mac && self.master.as_bytes() == other.master.as_bytes()
    }
}

impl Eq for DerivedKeys {}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("master", &self.master)
            .field("aes_key", &"<redacted>")
            .field("mac_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let keys = DerivedKeys::from_parts("hunter2".into(), [7u8; 32], [9u8; 64]);
        let printed = format!("{:?}", keys);

        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("7, 7"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn keys_compare_by_content() {
        let a = DerivedKeys::from_parts("m".into(), [1u8; 32], [2u8; 64]);
        let b = DerivedKeys::from_parts("m".into(), [1u8; 32], [2u8; 64]);
        let c = DerivedKeys::from_parts("m".into(), [1u8; 32], [3u8; 64]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn master_secret_zeroizes() {
        let mut secret = MasterSecret::new("correct horse");
        secret.zeroize();
        assert!(secret.is_empty());
    }
}
