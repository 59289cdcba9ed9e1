//! Auto-lock functionality for vault security.

use crate::store::LocalStore;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::info;

/// Tracks idle time against the auto-lock timeout
pub struct AutoLockManager {
    last_activity: Instant,
    timeout: Duration,
    enabled: bool,
}

impl AutoLockManager {
    /// Create a new auto-lock manager
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_activity: Instant::now(),
            timeout,
            enabled: true,
        }
    }

    /// A manager that never locks
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO)
        }
    }

    /// Update the last activity timestamp
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if the vault should be locked
    pub fn should_lock(&self) -> bool {
        if !self.enabled {
            return false;
        }
        self.last_activity.elapsed() >= self.timeout
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the time until lock
    pub fn time_until_lock(&self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        self.timeout.checked_sub(self.last_activity.elapsed())
    }
}

/// Drop the session keys once `manager` reports the vault idle
///
/// The task ends after locking; a later unlock starts a new one.
pub(crate) fn spawn_auto_lock(
    store: Arc<LocalStore>,
    manager: Arc<Mutex<AutoLockManager>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let remaining = {
                let manager = manager.lock().unwrap_or_else(|e| e.into_inner());
                if !manager.is_enabled() {
                    return;
                }
                manager.time_until_lock().unwrap_or(Duration::ZERO)
            };

            if remaining.is_zero() {
                if store.has_keys() {
                    info!("Auto-locking vault due to inactivity");
                    store.set_keys(None);
                }
                return;
            }

            tokio::time::sleep(remaining).await;
        }
    })
}
