//! derivepass relay
//!
//! A self-hostable object store for derivepass sync. Clients push opaque
//! record objects and fetch everything newer than a watermark; the relay
//! never sees plaintext or keys.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod storage;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::build_router;
pub use storage::RelayStorage;
