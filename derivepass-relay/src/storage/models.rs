//! Relay storage model types.

use serde::{Deserialize, Serialize};

/// An object as returned by a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub id: String,
    /// Opaque client payload
    pub data: serde_json::Value,
    pub modified_at: i64,
}

/// One entry of a push batch
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingObject {
    pub id: String,
    pub data: serde_json::Value,
}
