//! Record types shared by the store, the sync engine and the vault.
//!
//! Shapes are validated once, at the deserialization boundary. Everything
//! past that point can assume a well-formed value.

use crate::ranges;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Version tag written into every StoredRecord
pub const RECORD_VERSION: u32 = 1;

/// Domain reserved for the application itself
const RESERVED_DOMAIN: &str = "derivepass";

/// Malformed user input or stored shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A range expression was rejected, with the offending substring
    #[error("{0}")]
    Range(String),

    #[error("{field}: {message}")]
    Field {
        field: &'static str,
        message: String,
    },
}

impl ValidationError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Field {
            field,
            message: message.into(),
        }
    }
}

/// Generate a fresh record identifier
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-site parameters, the plaintext of a StoredRecord
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub domain: String,
    pub login: String,
    pub revision: u32,
    pub allowed_chars: String,
    pub required_chars: String,
    pub password_len: u32,
}

impl SiteRecord {
    /// Trim string fields and check every constraint
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        self.domain = self.domain.trim().to_string();
        self.login = self.login.trim().to_string();
        self.allowed_chars = self.allowed_chars.trim().to_string();
        self.required_chars = self.required_chars.trim().to_string();

        validate_domain(&self.domain)?;

        if self.login.is_empty() {
            return Err(ValidationError::field("login", "Username can't be empty"));
        }
        if self.revision == 0 {
            return Err(ValidationError::field(
                "revision",
                "Revision must be a positive number",
            ));
        }
        if self.allowed_chars.is_empty() {
            return Err(ValidationError::field(
                "allowedChars",
                "Allowed characters can't be empty",
            ));
        }
        ranges::flatten(&self.allowed_chars).map_err(|e| {
            ValidationError::field("allowedChars", format!("Invalid range: {}", e))
        })?;
        ranges::flatten(&self.required_chars).map_err(|e| {
            ValidationError::field("requiredChars", format!("Invalid range: {}", e))
        })?;
        check_password_len(self.password_len)?;

        Ok(self)
    }
}

/// Longest password a site may ask for
pub const MAX_PASSWORD_LEN: u32 = 1024;

pub(crate) fn check_password_len(password_len: u32) -> Result<(), ValidationError> {
    if password_len == 0 {
        return Err(ValidationError::field(
            "passwordLen",
            "Password length must be a positive number",
        ));
    }
    if password_len > MAX_PASSWORD_LEN {
        return Err(ValidationError::field(
            "passwordLen",
            format!("Password length can't exceed {}", MAX_PASSWORD_LEN),
        ));
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    if domain.is_empty() {
        return Err(ValidationError::field("domain", "Domain name can't be empty"));
    }
    if domain.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::field("domain", "Domain name must be lower case"));
    }
    if domain == RESERVED_DOMAIN {
        return Err(ValidationError::field(
            "domain",
            "\"derivepass\" domain is reserved",
        ));
    }
    if domain.starts_with("www.") || has_scheme(domain) {
        return Err(ValidationError::field(
            "domain",
            "Domain name should not start with `www.`, `http://`, or any `schema://`",
        ));
    }
    Ok(())
}

/// `<word>://` prefix, where a word is `[A-Za-z0-9_]+`
fn has_scheme(domain: &str) -> bool {
    match domain.find("://") {
        Some(0) | None => false,
        Some(idx) => domain[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
    }
}

/// A record as persisted locally and exchanged with the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub version: u32,
    /// Hex ciphertext of a SiteRecord, empty for tombstones
    pub encrypted: String,
    pub modified_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl StoredRecord {
    pub fn new(id: impl Into<String>, encrypted: String, modified_at: i64) -> Self {
        Self {
            id: id.into(),
            version: RECORD_VERSION,
            encrypted,
            modified_at,
            removed: None,
        }
    }

    /// A deletion marker for `id`
    pub fn tombstone(id: impl Into<String>, modified_at: i64) -> Self {
        Self {
            id: id.into(),
            version: RECORD_VERSION,
            encrypted: String::new(),
            modified_at,
            removed: Some(true),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Parse and validate a persisted JSON value
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let record: Self = serde_json::from_str(json)
            .map_err(|e| ValidationError::field("record", e.to_string()))?;
        record.validate()
    }

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::field("id", "Record id can't be empty"));
        }
        if self.version == 0 {
            return Err(ValidationError::field("version", "Version must be positive"));
        }
        if self.modified_at < 0 {
            return Err(ValidationError::field("modifiedAt", "Must not be negative"));
        }
        Ok(self)
    }
}

/// A StoredRecord with its plaintext, when the session keys can open it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydratedRecord {
    pub record: StoredRecord,
    pub decrypted: Option<SiteRecord>,
}

impl HydratedRecord {
    pub fn new(record: StoredRecord) -> Self {
        Self {
            record,
            decrypted: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn modified_at(&self) -> i64 {
        self.record.modified_at
    }
}

/// Remote link state. Absent when sync is disabled.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub host: String,
    pub token: String,
    /// Remote watermark consumed
    pub last_modified_at: i64,
    /// Local watermark already pushed
    #[serde(default)]
    pub local_last_modified_at: i64,
    pub last_synced_at: i64,
}

impl SyncState {
    /// Fresh state for a newly issued token
    pub fn linked(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            token: token.into(),
            last_modified_at: 0,
            local_last_modified_at: 0,
            last_synced_at: 0,
        }
    }
}

impl fmt::Debug for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncState")
            .field("host", &self.host)
            .field("token", &"<redacted>")
            .field("last_modified_at", &self.last_modified_at)
            .field("local_last_modified_at", &self.local_last_modified_at)
            .field("last_synced_at", &self.last_synced_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(domain: &str, login: &str) -> SiteRecord {
        SiteRecord {
            domain: domain.to_string(),
            login: login.to_string(),
            revision: 1,
            allowed_chars: "a-zA-Z0-9_.".to_string(),
            required_chars: String::new(),
            password_len: 24,
        }
    }

    #[test]
    fn test_site_record_trims() {
        let record = site("  example.com ", " alice ").validate().unwrap();
        assert_eq!(record.domain, "example.com");
        assert_eq!(record.login, "alice");
    }

    #[test]
    fn test_domain_rules() {
        assert!(site("", "a").validate().is_err());
        assert!(site("Example.com", "a").validate().is_err());
        assert!(site("derivepass", "a").validate().is_err());
        assert!(site("www.example.com", "a").validate().is_err());
        assert!(site("https://example.com", "a").validate().is_err());
        assert!(site("example.com/path://x", "a").validate().is_ok());
        assert!(site("wwwexample.com", "a").validate().is_ok());
    }

    #[test]
    fn test_numeric_and_range_rules() {
        let mut record = site("example.com", "alice");
        record.revision = 0;
        assert!(record.clone().validate().is_err());

        record.revision = 2;
        record.password_len = 0;
        assert!(record.clone().validate().is_err());

        record.password_len = MAX_PASSWORD_LEN + 1;
        let err = record.clone().validate().unwrap_err();
        assert!(matches!(err, ValidationError::Field { field: "passwordLen", .. }));

        record.password_len = MAX_PASSWORD_LEN;
        assert!(record.clone().validate().is_ok());

        record.password_len = 12;
        record.allowed_chars = "z-a".to_string();
        let err = record.clone().validate().unwrap_err();
        assert!(matches!(err, ValidationError::Field { field: "allowedChars", .. }));

        record.allowed_chars = "a-z".to_string();
        record.required_chars = "$-".to_string();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_site_record_json_shape() {
        let json = serde_json::to_value(site("example.com", "alice")).unwrap();
        assert_eq!(json["allowedChars"], "a-zA-Z0-9_.");
        assert_eq!(json["passwordLen"], 24);
    }

    #[test]
    fn test_stored_record_parse() {
        let json = r#"{"id":"abc","version":1,"encrypted":"00","modifiedAt":5}"#;
        let record = StoredRecord::from_json(json).unwrap();
        assert_eq!(record.modified_at, 5);
        assert!(!record.is_removed());

        assert!(StoredRecord::from_json(r#"{"id":"","version":1,"encrypted":"","modifiedAt":1}"#).is_err());
        assert!(StoredRecord::from_json("not json").is_err());
    }

    #[test]
    fn test_tombstone_serialization() {
        let json = serde_json::to_string(&StoredRecord::tombstone("x", 9)).unwrap();
        assert!(json.contains("\"removed\":true"));
        assert!(json.contains("\"encrypted\":\"\""));

        let plain = serde_json::to_string(&StoredRecord::new("y", "ab".into(), 1)).unwrap();
        assert!(!plain.contains("removed"));
    }

    #[test]
    fn test_sync_state_debug_hides_token() {
        let state = SyncState::linked("relay.example", "s3cret");
        assert!(!format!("{:?}", state).contains("s3cret"));
    }
}
