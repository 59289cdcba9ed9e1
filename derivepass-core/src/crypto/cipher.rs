//! Record encryption.
//!
//! Encrypt-then-MAC with:
//! - AES-256-CBC, PKCS#7 padding, random 16-byte IV
//! - HMAC-SHA256 over `IV || ciphertext`, keyed by the 64-byte MAC key
//!
//! Wire format is hex(`IV(16) || ciphertext || tag(32)`).
//!
//! Older per-field values are either `v1:`-prefixed (same scheme as above)
//! or bare hex(`IV || ciphertext`) with no integrity protection at all.

use crate::crypto::keys::DerivedKeys;
use crate::crypto::{CryptoError, Result};
use crate::models::SiteRecord;
use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Size of the CBC initialization vector
pub const IV_SIZE: usize = 16;

/// Size of the HMAC-SHA256 tag
pub const TAG_SIZE: usize = 32;

/// AES block size, the granularity of every ciphertext
const BLOCK_SIZE: usize = 16;

/// Prefix marking a legacy field that uses the authenticated scheme
const LEGACY_V1_PREFIX: &str = "v1:";

fn mac_over(keys: &DerivedKeys, iv: &[u8], ciphertext: &[u8]) -> Result<[u8; TAG_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(keys.mac_key())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    mac.update(iv);
    mac.update(ciphertext);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

fn cbc_decrypt(keys: &DerivedKeys, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::DecryptionFailed(
            "Ciphertext is not a whole number of blocks".to_string(),
        ));
    }

    let cipher = Aes256CbcDec::new_from_slices(keys.aes_key(), iv)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("Invalid padding".to_string()))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Encrypt raw bytes and return the hex wire format
pub fn encrypt(keys: &DerivedKeys, plaintext: &[u8]) -> Result<String> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(keys.aes_key(), &iv)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = mac_over(keys, &iv, &ciphertext)?;

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len() + TAG_SIZE);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);

    Ok(hex::encode(out))
}

/// Verify and decrypt the hex wire format
///
/// # Security
///
/// The tag is checked in constant time before any decryption happens.
pub fn decrypt(keys: &DerivedKeys, value: &str) -> Result<Vec<u8>> {
    let raw = decode_hex(value)?;
    if raw.len() < IV_SIZE + BLOCK_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed("Ciphertext too short".to_string()));
    }

    let (body, tag) = raw.split_at(raw.len() - TAG_SIZE);
    let (iv, ciphertext) = body.split_at(IV_SIZE);

    let expected = mac_over(keys, iv, ciphertext)?;
    if !bool::from(expected.as_slice().ct_eq(tag)) {
        return Err(CryptoError::AuthenticationFailed);
    }

    cbc_decrypt(keys, iv, ciphertext)
}

/// Serialize and encrypt a site record
pub fn encrypt_record(keys: &DerivedKeys, record: &SiteRecord) -> Result<String> {
    let mut payload = serde_json::to_vec(record)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let encrypted = encrypt(keys, &payload);
    payload.zeroize();
    encrypted
}

/// Decrypt a site record
///
/// A failure means the record cannot be opened with these keys. Callers
/// keep the record and leave it undecrypted.
pub fn decrypt_record(keys: &DerivedKeys, value: &str) -> Result<SiteRecord> {
    let mut payload = decrypt(keys, value)?;
    let parsed = serde_json::from_slice::<SiteRecord>(&payload);
    payload.zeroize();

    let record = parsed.map_err(|e| {
        CryptoError::DecryptionFailed(format!("Invalid record payload: {}", e))
    })?;

    record
        .validate()
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid record payload: {}", e)))
}

/// Decrypt a single field of a legacy record
///
/// `v1:`-prefixed values use the authenticated scheme; bare values are
/// AES-CBC only.
pub fn decrypt_legacy_string(keys: &DerivedKeys, value: &str) -> Result<String> {
    let bytes = match value.strip_prefix(LEGACY_V1_PREFIX) {
        Some(rest) => decrypt(keys, rest)?,
        None => {
            let raw = decode_hex(value)?;
            if raw.len() < IV_SIZE {
                return Err(CryptoError::DecryptionFailed("Ciphertext too short".to_string()));
            }
            let (iv, ciphertext) = raw.split_at(IV_SIZE);
            cbc_decrypt(keys, iv, ciphertext)?
        }
    };

    String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed("Not UTF-8".to_string()))
}

/// Produce a bare legacy (unauthenticated) field value
#[cfg(test)]
pub(crate) fn encrypt_legacy_unauthenticated(keys: &DerivedKeys, plaintext: &str) -> String {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    let cipher = Aes256CbcEnc::new_from_slices(keys.aes_key(), &iv).unwrap();
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    hex::encode([iv.as_slice(), ciphertext.as_slice()].concat())
}
