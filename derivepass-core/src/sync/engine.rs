//! Sync engine: runs one fetch/push/apply cycle against the remote store.
//!
//! Two watermarks drive a cycle. The remote watermark is the highest
//! server `modifiedAt` already consumed and bounds the next fetch. The
//! local watermark is the highest local `modifiedAt` already pushed; a
//! record above it holds an edit the remote has not seen.

use crate::models::{now_millis, StoredRecord, SyncState};
use crate::store::{LocalStore, Mutation, Origin};
use crate::sync::config::SyncStateStore;
use crate::sync::conflict::{ConflictResolver, Resolution};
use crate::sync::models::{PushObject, RemoteObject};
use crate::sync::SyncError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The remote object store as seen by the engine
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Exchange account credentials for a bearer token
    async fn request_token(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<String, SyncError>;

    async fn revoke_token(&self, host: &str, token: &str) -> Result<(), SyncError>;

    /// Raw objects modified after `since`; each is validated by the caller
    async fn fetch_objects(
        &self,
        host: &str,
        token: &str,
        since: i64,
    ) -> Result<Vec<serde_json::Value>, SyncError>;

    /// Store a batch, returning the `modifiedAt` the server gave it
    async fn push_objects(
        &self,
        host: &str,
        token: &str,
        objects: &[PushObject],
    ) -> Result<i64, SyncError>;
}

/// What a cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    /// Fetched objects that failed validation
    pub skipped: usize,
    pub pushed: usize,
    /// Remote updates written to the local store
    pub applied: usize,
    /// Local records given a fresh `modifiedAt` so they get pushed
    pub restamped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub linked: bool,
    pub host: Option<String>,
    /// Unix milliseconds of the last completed cycle, 0 before the first
    pub last_synced_at: Option<i64>,
}

struct Applied {
    applied: usize,
    restamped: usize,
    local_mark: i64,
}

pub struct RemoteSyncEngine {
    transport: Arc<dyn RemoteTransport>,
    store: Arc<LocalStore>,
    state: SyncStateStore,
    cycle_lock: Mutex<()>,
}

impl RemoteSyncEngine {
    pub fn new(transport: Arc<dyn RemoteTransport>, store: Arc<LocalStore>) -> Self {
        let state = SyncStateStore::new(store.storage().clone());
        Self {
            transport,
            store,
            state,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn state_store(&self) -> &SyncStateStore {
        &self.state
    }

    /// Obtain a token for `username` and link this device to `host`
    ///
    /// Any previous link is replaced and both watermarks start over, so
    /// the first cycle pulls everything and pushes every local record.
    pub async fn authorize(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<(), SyncError> {
        let token = self
            .transport
            .request_token(host, username, password)
            .await?;

        let _cycle = self.cycle_lock.lock().await;
        self.state.save(&SyncState::linked(host, token))?;
        info!(host = %host, "linked to remote");
        Ok(())
    }

    /// Forget the link, then try to revoke the token remotely
    pub async fn unlink(&self) -> Result<(), SyncError> {
        let Some(old) = self.state.load()? else {
            return Ok(());
        };
        self.state.clear()?;
        info!(host = %old.host, "unlinked from remote");

        if let Err(e) = self.transport.revoke_token(&old.host, &old.token).await {
            debug!("token revocation failed: {}", e);
        }
        Ok(())
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        let state = self.state.load()?;
        Ok(SyncStatus {
            linked: state.is_some(),
            host: state.as_ref().map(|s| s.host.clone()),
            last_synced_at: state.map(|s| s.last_synced_at),
        })
    }

    /// Run one sync cycle. Cycles never overlap.
    ///
    /// Rejected credentials unlink the device before the error is
    /// returned.
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let _cycle = self.cycle_lock.lock().await;
        let state = self.state.load()?.ok_or(SyncError::NotLinked)?;

        match self.cycle(&state).await {
            Err(SyncError::Auth(status)) => {
                warn!(status, host = %state.host, "remote rejected credentials, unlinking");
                if self.is_current(&state)? {
                    self.state.clear()?;
                }
                Err(SyncError::Auth(status))
            }
            result => result,
        }
    }

    fn is_current(&self, state: &SyncState) -> Result<bool, SyncError> {
        Ok(self
            .state
            .load()?
            .is_some_and(|s| s.host == state.host && s.token == state.token))
    }

    async fn cycle(&self, state: &SyncState) -> Result<CycleReport, SyncError> {
        let pushed_mark = state.local_last_modified_at;
        let (snapshot, cycle_mark) = self.store.read(|set, clock| {
            let records: Vec<StoredRecord> = set
                .iter()
                .filter(|r| r.modified_at() > pushed_mark)
                .map(|r| r.record.clone())
                .collect();
            (records, clock.last_issued())
        });

        // 1. Fetch
        let values = self
            .transport
            .fetch_objects(&state.host, &state.token, state.last_modified_at)
            .await?;

        let mut report = CycleReport {
            fetched: values.len(),
            ..Default::default()
        };

        // 2. Validate, keeping the latest object per id
        let mut latest: HashMap<String, RemoteObject> = HashMap::new();
        for value in values {
            match RemoteObject::parse(value) {
                Ok(object) => match latest.get(&object.id) {
                    Some(seen) if seen.modified_at >= object.modified_at => {}
                    _ => {
                        latest.insert(object.id.clone(), object);
                    }
                },
                Err(e) => {
                    warn!("skipping remote object: {}", e);
                    report.skipped += 1;
                }
            }
        }

        let mut remote_mark = latest
            .values()
            .map(|o| o.modified_at)
            .fold(state.last_modified_at, i64::max);

        // 3. Push local-only changes, oldest first
        let mut outgoing: Vec<StoredRecord> = snapshot
            .into_iter()
            .filter(|r| !latest.contains_key(&r.id))
            .collect();
        outgoing.sort_by_key(|r| r.modified_at);

        let pushed: HashMap<String, i64> = outgoing
            .iter()
            .map(|r| (r.id.clone(), r.modified_at))
            .collect();

        if !outgoing.is_empty() {
            let objects: Vec<PushObject> = outgoing.iter().map(PushObject::from).collect();
            let batch_at = self
                .transport
                .push_objects(&state.host, &state.token, &objects)
                .await?;
            report.pushed = objects.len();
            remote_mark = remote_mark.max(batch_at);
            debug!(count = objects.len(), batch_at, "pushed local records");
        }

        // 4. Apply remote updates in one batch
        let mut incoming: Vec<RemoteObject> = latest.into_values().collect();
        incoming.sort_by_key(|o| o.modified_at);

        let (applied, _) = self.store.update(|batch| {
            let mut accepted = HashSet::new();
            let mut settled = HashSet::new();
            let mut winners = HashSet::new();

            for object in incoming {
                let local = batch.records().get(&object.id);
                match ConflictResolver::resolve(local, &object, pushed_mark) {
                    Resolution::Unchanged => {
                        settled.insert(object.id);
                    }
                    Resolution::KeepLocal => {
                        debug!(id = %object.id, "local edit wins over remote update");
                        winners.insert(object.id);
                    }
                    Resolution::AcceptRemote => {
                        let modified_at = batch.next_modified_at();
                        accepted.insert(object.id.clone());
                        batch.apply(
                            Origin::Remote,
                            vec![Mutation::Put(object.into_record(modified_at))],
                        );
                    }
                }
            }

            // Local changes the remote has not received must stay above the
            // new watermark; the ones that would fall below it get a fresh
            // modifiedAt and go out with the next push.
            let (local_mark, stale): (i64, Vec<StoredRecord>) = if accepted.is_empty() {
                let local_mark = cycle_mark.max(pushed_mark);
                let stale = batch
                    .records()
                    .iter()
                    .filter(|r| winners.contains(r.id()) && r.modified_at() <= local_mark)
                    .map(|r| r.record.clone())
                    .collect();
                (local_mark, stale)
            } else {
                let local_mark = batch.clock().last_issued().max(pushed_mark);
                let stale = batch
                    .records()
                    .iter()
                    .filter(|r| {
                        r.modified_at() > pushed_mark
                            && pushed.get(r.id()) != Some(&r.modified_at())
                            && !accepted.contains(r.id())
                            && !settled.contains(r.id())
                    })
                    .map(|r| r.record.clone())
                    .collect();
                (local_mark, stale)
            };

            let restamped = stale.len();
            let mutations: Vec<Mutation> = stale
                .into_iter()
                .map(|record| {
                    Mutation::Put(StoredRecord {
                        modified_at: batch.next_modified_at(),
                        ..record
                    })
                })
                .collect();
            batch.apply(Origin::Local, mutations);

            Applied {
                applied: accepted.len(),
                restamped,
                local_mark,
            }
        })?;

        report.applied = applied.applied;
        report.restamped = applied.restamped;

        // 5. Record progress, unless the link changed underneath us
        if self.is_current(state)? {
            let mut next = state.clone();
            next.last_modified_at = remote_mark;
            next.local_last_modified_at = applied.local_mark;
            next.last_synced_at = now_millis();
            self.state.save(&next)?;
        } else {
            debug!("link changed during cycle, not saving progress");
        }

        info!(
            fetched = report.fetched,
            pushed = report.pushed,
            applied = report.applied,
            "sync cycle complete"
        );
        Ok(report)
    }
}
