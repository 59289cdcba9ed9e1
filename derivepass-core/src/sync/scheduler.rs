//! Background sync loop.
//!
//! Cycles run on a fixed interval and whenever a local change arrives.
//! Triggers received while a cycle runs collapse into one follow-up cycle.

use crate::store::{RecordObserver, Transition};
use crate::sync::engine::RemoteSyncEngine;
use crate::sync::SyncError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Requests a cycle whenever the local store changes on this device
#[derive(Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<()>,
}

impl SyncTrigger {
    pub fn fire(&self) {
        // A full queue already holds a pending cycle
        let _ = self.tx.try_send(());
    }
}

impl RecordObserver for SyncTrigger {
    fn on_transition(&self, transition: &Transition) {
        if transition.has_local_changes() {
            self.fire();
        }
    }
}

pub struct SyncScheduler {
    engine: Arc<RemoteSyncEngine>,
    trigger: SyncTrigger,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Start the loop on the current tokio runtime
    pub fn spawn(engine: Arc<RemoteSyncEngine>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(run(engine.clone(), rx, shutdown_rx, interval));

        Self {
            engine,
            trigger: SyncTrigger { tx },
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn engine(&self) -> &Arc<RemoteSyncEngine> {
        &self.engine
    }

    /// Ask for a cycle as soon as possible
    pub fn trigger(&self) {
        self.trigger.fire();
    }

    /// An observer to subscribe to the local store
    pub fn observer(&self) -> Arc<SyncTrigger> {
        Arc::new(self.trigger.clone())
    }

    /// Link to a remote and start syncing right away
    pub async fn authorize(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<(), SyncError> {
        self.engine.authorize(host, username, password).await?;
        self.trigger();
        Ok(())
    }

    /// Stop the loop, waiting for a running cycle to finish
    pub async fn shutdown(&self) {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("sync task ended abnormally: {}", e);
            }
        }
    }
}

async fn run(
    engine: Arc<RemoteSyncEngine>,
    mut triggers: mpsc::Receiver<()>,
    mut shutdown: oneshot::Receiver<()>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = triggers.recv() => {
                if received.is_none() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        match engine.run_cycle().await {
            Ok(report) => debug!(?report, "scheduled sync finished"),
            Err(SyncError::NotLinked) => {}
            Err(e) => warn!("sync cycle failed: {}", e),
        }
    }

    debug!("sync scheduler stopped");
}
