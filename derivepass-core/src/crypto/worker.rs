//! Off-thread execution of KDF calls.
//!
//! scrypt with the frozen parameters takes a noticeable fraction of a
//! second. Requests queue on a bounded channel and a single worker task
//! runs them one at a time on the blocking pool, so replies come back in
//! the order requests were made.

use crate::crypto::keys::{DerivedKeys, MasterSecret};
use crate::crypto::{kdf, password, CryptoError};
use crate::models::SiteRecord;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Default number of requests that may wait for the worker
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

enum Request {
    ComputeKeys {
        master: MasterSecret,
        reply: oneshot::Sender<crate::Result<DerivedKeys>>,
    },
    ComputePassword {
        keys: DerivedKeys,
        record: SiteRecord,
        reply: oneshot::Sender<crate::Result<String>>,
    },
}

/// Handle to the crypto worker task
///
/// Cloning is cheap; all clones feed the same queue.
#[derive(Clone)]
pub struct CryptoWorker {
    tx: mpsc::Sender<Request>,
}

impl CryptoWorker {
    /// Start a worker on the current tokio runtime
    pub fn spawn() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Derive the session keys for `master`
    pub async fn compute_keys(&self, master: MasterSecret) -> crate::Result<DerivedKeys> {
        let (reply, response) = oneshot::channel();
        self.send(Request::ComputeKeys { master, reply }).await?;
        response.await.map_err(|_| CryptoError::WorkerStopped)?
    }

    /// Derive the password for `record`
    pub async fn compute_password(
        &self,
        keys: &DerivedKeys,
        record: &SiteRecord,
    ) -> crate::Result<String> {
        let (reply, response) = oneshot::channel();
        self.send(Request::ComputePassword {
            keys: keys.clone(),
            record: record.clone(),
            reply,
        })
        .await?;
        response.await.map_err(|_| CryptoError::WorkerStopped)?
    }

    async fn send(&self, request: Request) -> crate::Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| CryptoError::WorkerStopped.into())
    }
}

async fn run(mut rx: mpsc::Receiver<Request>) {
    while let Some(request) = rx.recv().await {
        match request {
            Request::ComputeKeys { master, reply } => {
                let result = tokio::task::spawn_blocking(move || kdf::compute_keys(&master))
                    .await
                    .map_err(|e| CryptoError::KdfFailed(e.to_string()))
                    .and_then(|r| r)
                    .map_err(crate::Error::from);
                // Receiver may have given up waiting
                let _ = reply.send(result);
            }
            Request::ComputePassword {
                keys,
                record,
                reply,
            } => {
                let result = tokio::task::spawn_blocking(move || {
                    password::compute_password(keys.master(), &record)
                })
                .await
                .map_err(|e| crate::Error::from(CryptoError::KdfFailed(e.to_string())))
                .and_then(|r| r);
                let _ = reply.send(result);
            }
        }
    }

    debug!("crypto worker stopped");
}
