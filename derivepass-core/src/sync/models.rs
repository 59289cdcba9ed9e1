//! Sync wire format.
//!
//! `GET /objects?since=<ms>` returns `{objects: [{id, data, modifiedAt}]}`
//! and `PUT /objects` takes `{objects: [{id, data}]}`, answering with the
//! single `modifiedAt` the server assigned to the whole batch.

use crate::models::StoredRecord;
use crate::sync::SyncError;
use serde::{Deserialize, Serialize};

/// Record payload as stored remotely. `modifiedAt` is server-assigned and
/// lives on the envelope instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteData {
    pub id: String,
    pub version: u32,
    pub encrypted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl From<&StoredRecord> for RemoteData {
    fn from(record: &StoredRecord) -> Self {
        Self {
            id: record.id.clone(),
            version: record.version,
            encrypted: record.encrypted.clone(),
            removed: record.removed,
        }
    }
}

/// A remote object as returned by a fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub id: String,
    pub data: RemoteData,
    pub modified_at: i64,
}

impl RemoteObject {
    /// Parse and validate one fetched object
    pub fn parse(value: serde_json::Value) -> Result<Self, SyncError> {
        let object: Self =
            serde_json::from_value(value).map_err(|e| SyncError::Parse(e.to_string()))?;

        if object.id.is_empty() {
            return Err(SyncError::Parse("object without id".to_string()));
        }
        if object.data.id != object.id {
            return Err(SyncError::Parse(format!(
                "object {} carries record {}",
                object.id, object.data.id
            )));
        }
        if object.data.version == 0 {
            return Err(SyncError::Parse(format!("object {} has version 0", object.id)));
        }

        Ok(object)
    }

    /// The local form of this object, stamped with a local `modifiedAt`
    pub fn into_record(self, modified_at: i64) -> StoredRecord {
        StoredRecord {
            id: self.id,
            version: self.data.version,
            encrypted: self.data.encrypted,
            modified_at,
            removed: self.data.removed,
        }
    }
}

/// One entry of a push batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushObject {
    pub id: String,
    pub data: RemoteData,
}

impl From<&StoredRecord> for PushObject {
    fn from(record: &StoredRecord) -> Self {
        Self {
            id: record.id.clone(),
            data: record.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchResponse {
    pub objects: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    pub objects: &'a [PushObject],
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub modified_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeRequest<'a> {
    pub token: &'a str,
}
