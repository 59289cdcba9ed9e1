//! Deterministic site password derivation.
//!
//! The password for a site is a pure function of the master secret and
//! the site record. Its KDF output is read as one little-endian integer
//! and repeatedly divided by the size of the current alphabet.

use crate::crypto::kdf::derive_bytes;
use crate::crypto::keys::MasterSecret;
use crate::models::{check_password_len, SiteRecord, ValidationError};
use crate::ranges;
use std::collections::BTreeSet;
use zeroize::Zeroize;

/// Raw byte count consumed by the legacy encoding
const LEGACY_PASSWORD_SIZE: usize = 18;

/// Output alphabet of the legacy encoding, in index order
const PASSWORD_BASE64: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_.";

/// Expanded alphabets of a site record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRanges {
    pub allowed: Vec<char>,
    pub required: Vec<char>,
    pub union: Vec<char>,
    pub password_len: usize,
}

impl PasswordRanges {
    pub fn from_record(record: &SiteRecord) -> Result<Self, ValidationError> {
        check_password_len(record.password_len)?;
        let allowed = ranges::flatten(&record.allowed_chars)?;
        let required = ranges::flatten(&record.required_chars)?;

        if allowed.is_empty() {
            return Err(ValidationError::field(
                "allowedChars",
                "Allowed characters can't be empty",
            ));
        }

        let union: BTreeSet<char> = allowed.iter().chain(required.iter()).copied().collect();

        Ok(Self {
            allowed,
            required,
            union: union.into_iter().collect(),
            password_len: record.password_len as usize,
        })
    }

    /// Upper bound on the entropy of a password drawn from these ranges
    pub fn entropy_bits(&self) -> usize {
        ((self.union.len() as f64).log2() * self.password_len as f64).ceil() as usize
    }
}

/// KDF salt for a site: `domain/login`, with `#revision` only past the first
pub fn source_string(record: &SiteRecord) -> String {
    if record.revision > 1 {
        format!("{}/{}#{}", record.domain, record.login, record.revision)
    } else {
        format!("{}/{}", record.domain, record.login)
    }
}

/// Arbitrary-precision unsigned integer, little-endian 32-bit limbs
struct BigNat {
    limbs: Vec<u32>,
}

impl BigNat {
    fn from_le_bytes(bytes: &[u8]) -> Self {
        let limbs = bytes
            .chunks(4)
            .map(|chunk| {
                chunk
                    .iter()
                    .rev()
                    .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
            })
            .collect();
        Self { limbs }
    }

    /// Divide in place and return the remainder
    fn div_rem(&mut self, divisor: u32) -> u32 {
        let divisor = u64::from(divisor);
        let mut rem = 0u64;
        for limb in self.limbs.iter_mut().rev() {
            let cur = (rem << 32) | u64::from(*limb);
            *limb = (cur / divisor) as u32;
            rem = cur % divisor;
        }
        rem as u32
    }
}

impl Drop for BigNat {
    fn drop(&mut self) {
        self.limbs.zeroize();
    }
}

/// Map KDF output onto the record's alphabets
///
/// Characters are drawn from `union` while required characters are still
/// pending, from `allowed` once they are all placed, and from the pending
/// required set alone when exactly that many slots remain.
pub fn to_password(raw: &[u8], ranges: &PasswordRanges) -> String {
    let mut num = BigNat::from_le_bytes(raw);
    let mut pending: BTreeSet<char> = ranges.required.iter().copied().collect();
    let mut out = String::with_capacity(ranges.password_len);

    for emitted in 0..ranges.password_len {
        let remaining = ranges.password_len - emitted;

        let forced: Vec<char>;
        let alphabet: &[char] = if pending.is_empty() {
            &ranges.allowed
        } else if pending.len() == remaining {
            forced = pending.iter().copied().collect();
            &forced
        } else {
            &ranges.union
        };

        let idx = num.div_rem(alphabet.len() as u32) as usize;
        let ch = alphabet[idx];

        pending.remove(&ch);
        out.push(ch);
    }

    out
}

/// Fixed 3-bytes-to-4-characters encoding for records on default options
pub fn to_legacy_password(raw: &[u8]) -> Result<String, ValidationError> {
    if raw.len() != LEGACY_PASSWORD_SIZE {
        return Err(ValidationError::field("passwordLen", "Invalid raw bytes"));
    }

    let mut out = String::with_capacity(LEGACY_PASSWORD_SIZE / 3 * 4);
    for chunk in raw.chunks(3) {
        let (a, b, c) = (chunk[0], chunk[1], chunk[2]);
        for idx in [
            a >> 2,
            ((a & 0x03) << 4) | (b >> 4),
            ((b & 0x0f) << 2) | (c >> 6),
            c & 0x3f,
        ] {
            out.push(char::from(PASSWORD_BASE64[idx as usize]));
        }
    }

    Ok(out)
}

/// Derive the password for a site
///
/// Records on exactly the default options take the legacy encoding, so
/// passwords issued before per-site options existed never change.
pub fn compute_password(master: &MasterSecret, record: &SiteRecord) -> crate::Result<String> {
    let ranges = PasswordRanges::from_record(record)?;
    let byte_len = ranges.entropy_bits().div_ceil(8);

    let mut raw = derive_bytes(
        master.as_bytes(),
        source_string(record).as_bytes(),
        byte_len,
    )?;

    let password = if record.has_default_options() {
        to_legacy_password(&raw)
    } else {
        Ok(to_password(&raw, &ranges))
    };
    raw.zeroize();

    Ok(password?)
}
