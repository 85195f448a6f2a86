//! Sync engine: drains the mutation queue, pulls remote changes and uploads
//! the audit log.
//!
//! At most one cycle runs at a time. A trigger that arrives while a cycle is
//! running is coalesced into it instead of starting a second one. Queue items
//! are replayed strictly in enqueue order; once an item of an entity fails or
//! conflicts, the remaining items of that entity wait for the next cycle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::status::{EngineStatus, StatusPublisher, Subscription, SyncProgress, SyncState};
use crate::audit::AuditLog;
use crate::config::{EngineConfig, RetryPolicy};
use crate::db::{LocalStore, META_AUDIT_CURSOR, META_LAST_PULL_AT, META_LAST_SYNC_AT};
use crate::error::{Error, Result};
use crate::models::{
    Actor, AuditAction, AuditEntry, ConflictRecord, EntityId, EntitySnapshot, MutationAction,
    MutationId, PendingMutation, SyncStatus, EVALUATION_RESOURCE,
};
use crate::remote::{RemoteApi, RemoteEntity, RemoteError};
use crate::util::now_ms;
use crate::versions::VersionStore;

const DEFAULT_AUDIT_BATCH_SIZE: usize = 100;

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Timer, connectivity change or local write. Honours backoff.
    Automatic,
    /// User request. Retries backed-off and exhausted items immediately.
    Manual,
}

/// Counters for one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Queue items confirmed by the remote authority
    pub pushed: usize,
    /// Queue items that raised a conflict record
    pub conflicts: usize,
    /// Queue items that failed and stay queued
    pub failed: usize,
    /// Queue items left for a later cycle
    pub skipped: usize,
    /// Remote changes applied locally
    pub pulled: usize,
    pub audit_uploaded: usize,
    /// The cycle stopped early because the device went offline
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl SyncReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another cycle was already running and will pick up the work
    Coalesced,
    Offline,
}

enum ItemOutcome {
    Pushed,
    Conflict,
    /// `exhausted` when the item now waits for a manual sync
    Failed { message: String, exhausted: bool },
    Skipped,
}

/// Queue counters tracked by a running cycle so progress updates need no
/// store reads
#[derive(Debug, Clone, Copy, Default)]
struct QueueCounts {
    pending: usize,
    errors: usize,
    conflicts: usize,
}

/// Clears the running flag however the cycle ends
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct CycleState {
    status: SyncState,
    progress: SyncProgress,
    last_error: Option<String>,
    last_sync_at: Option<i64>,
}

/// Offline-first replication of evaluation records
pub struct SyncEngine {
    pub(super) store: Arc<dyn LocalStore>,
    pub(super) remote: Arc<dyn RemoteApi>,
    pub(super) versions: Arc<VersionStore>,
    pub(super) audit: Arc<AuditLog>,
    queue_backoff: RetryPolicy,
    audit_batch_size: usize,
    storage_degraded: bool,
    online: AtomicBool,
    running: AtomicBool,
    cancel_requested: AtomicBool,
    shutdown: AtomicBool,
    token: RwLock<Option<String>>,
    actor: RwLock<Actor>,
    /// Earliest instant an automatic cycle may retry a failed item
    not_before: Mutex<HashMap<MutationId, Instant>>,
    /// Entities with a queue item on the wire
    in_flight: Mutex<HashSet<EntityId>>,
    state: Mutex<CycleState>,
    publisher: StatusPublisher,
    wake: Notify,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        versions: Arc<VersionStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let last_sync_at = store
            .get_meta(META_LAST_SYNC_AT)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok());

        Self {
            store,
            remote,
            versions,
            audit,
            queue_backoff: RetryPolicy::queue_default(),
            audit_batch_size: DEFAULT_AUDIT_BATCH_SIZE,
            storage_degraded: false,
            online: AtomicBool::new(true),
            running: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            token: RwLock::new(None),
            actor: RwLock::new(Actor::system()),
            not_before: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            state: Mutex::new(CycleState {
                last_sync_at,
                ..CycleState::default()
            }),
            publisher: StatusPublisher::new(EngineStatus::default()),
            wake: Notify::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.queue_backoff = config.queue_backoff;
        self.audit_batch_size = config.audit_batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_queue_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.queue_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_audit_batch_size(mut self, batch_size: usize) -> Self {
        self.audit_batch_size = batch_size.max(1);
        self
    }

    /// Report that the engine runs on the in-memory fallback store
    #[must_use]
    pub fn with_storage_degraded(mut self, degraded: bool) -> Self {
        self.storage_degraded = degraded;
        self
    }

    pub const fn queue_backoff(&self) -> RetryPolicy {
        self.queue_backoff
    }

    pub fn set_access_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub(super) fn access_token(&self) -> Result<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Unauthenticated)
    }

    /// Actor recorded on version and audit entries written by the engine
    pub fn set_actor(&self, actor: Actor) {
        *self.actor.write().unwrap_or_else(PoisonError::into_inner) = actor;
    }

    pub fn actor(&self) -> Actor {
        self.actor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Feed the connectivity signal.
    ///
    /// Going offline cancels the running cycle after its current item.
    /// Coming back online wakes the background worker.
    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return;
        }

        if online {
            tracing::info!("Connectivity restored");
            let running = self.running.load(Ordering::SeqCst);
            self.update_state(|state| {
                if !running {
                    state.status = SyncState::Idle;
                }
            });
            self.wake.notify_one();
        } else {
            tracing::info!("Connectivity lost, suspending sync");
            self.cancel_requested.store(true, Ordering::SeqCst);
            self.update_state(|state| state.status = SyncState::Offline);
        }
    }

    /// Wake the background worker for an automatic cycle
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    /// Ask the running cycle to stop after its current item
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&EngineStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.publisher.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<EngineStatus> {
        self.publisher.watch()
    }

    /// Current status with counts read from the store
    pub fn status(&self) -> EngineStatus {
        let max_attempts = self.queue_backoff.max_retries;
        let (pending, errors) = match self.store.dequeue_all() {
            Ok(queue) => (
                queue.len(),
                queue
                    .iter()
                    .filter(|mutation| mutation.is_exhausted(max_attempts))
                    .count(),
            ),
            Err(error) => {
                tracing::warn!("Failed to read queue for status: {error}");
                (0, 0)
            }
        };
        let conflicts = self.store.list_unresolved_conflicts().map_or_else(
            |error| {
                tracing::warn!("Failed to read conflicts for status: {error}");
                0
            },
            |conflicts| conflicts.len(),
        );

        self.status_with(QueueCounts {
            pending,
            errors,
            conflicts,
        })
    }

    fn status_with(&self, counts: QueueCounts) -> EngineStatus {
        let state = self.lock_state();
        EngineStatus {
            status: state.status,
            last_sync_at: state.last_sync_at,
            pending_count: counts.pending,
            conflict_count: counts.conflicts,
            error_count: counts.errors,
            progress: state.progress,
            last_error: state.last_error.clone(),
            storage_degraded: self.storage_degraded,
        }
    }

    /// Count one more processed item and publish without touching the store
    fn advance_progress(&self, counts: QueueCounts) {
        self.lock_state().progress.completed += 1;
        self.publisher.publish(&self.status_with(counts));
    }

    /// Push a fresh status snapshot to subscribers
    pub fn publish_status(&self) {
        let status = self.status();
        self.publisher.publish(&status);
    }

    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_state(&self, update: impl FnOnce(&mut CycleState)) {
        update(&mut self.lock_state());
        self.publish_status();
    }

    fn lock_backoff(&self) -> MutexGuard<'_, HashMap<MutationId, Instant>> {
        self.not_before.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entities whose queue item is being sent right now.
    ///
    /// Holding the guard keeps the engine from starting a send, so local
    /// writes can tell whether a record may still reach the server.
    pub(crate) fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<EntityId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one cycle now.
    ///
    /// Returns `Coalesced` when a cycle is already running and `Offline`
    /// without touching the queue when the device is offline. An error means
    /// the cycle itself failed (no token, storage down, token rejected);
    /// per-item failures are reported in the `SyncReport`.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        if !self.is_online() {
            self.update_state(|state| state.status = SyncState::Offline);
            return Ok(SyncOutcome::Offline);
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync already running, request coalesced");
            return Ok(SyncOutcome::Coalesced);
        }
        let _guard = CycleGuard(&self.running);

        self.cancel_requested.store(false, Ordering::SeqCst);
        // Connectivity may have dropped between the check and the reset
        if !self.is_online() {
            self.update_state(|state| state.status = SyncState::Offline);
            return Ok(SyncOutcome::Offline);
        }

        self.update_state(|state| {
            state.status = SyncState::Syncing;
            state.progress = SyncProgress::default();
        });
        tracing::info!("Sync cycle started ({trigger:?})");

        let result = self.run_cycle(trigger).await;
        let resting = if self.is_online() {
            SyncState::Idle
        } else {
            SyncState::Offline
        };

        match result {
            Ok(report) => {
                let finished_at = now_ms();
                if let Err(error) = self
                    .store
                    .set_meta(META_LAST_SYNC_AT, &finished_at.to_string())
                {
                    tracing::warn!("Failed to record last sync time: {error}");
                }

                let failed = report.has_failures();
                let last_error = report.errors.last().cloned();
                self.update_state(|state| {
                    state.last_sync_at = Some(finished_at);
                    if failed {
                        state.status = SyncState::Error;
                        state.last_error = last_error;
                    } else {
                        state.status = resting;
                        state.last_error = None;
                    }
                });
                if failed {
                    self.update_state(|state| state.status = resting);
                }

                tracing::info!(
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    failed = report.failed,
                    skipped = report.skipped,
                    pulled = report.pulled,
                    audit_uploaded = report.audit_uploaded,
                    cancelled = report.cancelled,
                    "Sync cycle finished"
                );
                Ok(SyncOutcome::Completed(report))
            }
            Err(error) => {
                tracing::warn!("Sync cycle failed: {error}");
                let message = error.to_string();
                self.update_state(|state| {
                    state.status = SyncState::Error;
                    state.last_error = Some(message);
                });
                self.update_state(|state| state.status = resting);
                Err(error)
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        let token = self.access_token()?;
        let mut report = SyncReport::default();

        self.push_queue(&token, trigger, &mut report).await?;
        if report.cancelled {
            return Ok(report);
        }

        if let Err(error) = self.pull_changes(&token, &mut report).await {
            if matches!(error, Error::Unauthenticated) {
                return Err(error);
            }
            tracing::warn!("Pull failed: {error}");
            report.errors.push(format!("pull: {error}"));
        }
        if self.cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        if let Err(error) = self.upload_audit(&token, &mut report).await {
            if matches!(error, Error::Unauthenticated) {
                return Err(error);
            }
            tracing::warn!("Audit upload failed: {error}");
            report.errors.push(format!("audit upload: {error}"));
        }
        Ok(report)
    }

    async fn push_queue(
        &self,
        token: &str,
        trigger: SyncTrigger,
        report: &mut SyncReport,
    ) -> Result<()> {
        let queue = self.store.dequeue_all()?;
        let max_attempts = self.queue_backoff.max_retries;
        let queued: HashSet<MutationId> = queue.iter().map(|item| item.id).collect();
        self.lock_backoff().retain(|id, _| queued.contains(id));

        let mut counts = QueueCounts {
            pending: queue.len(),
            errors: queue
                .iter()
                .filter(|item| item.is_exhausted(max_attempts))
                .count(),
            conflicts: self.store.list_unresolved_conflicts()?.len(),
        };
        let total = queue.len();
        self.update_state(|state| state.progress = SyncProgress { completed: 0, total });

        let mut blocked: HashSet<EntityId> = HashSet::new();
        for (index, item) in queue.iter().enumerate() {
            if self.cancelled() {
                tracing::info!("Sync cycle cancelled");
                report.cancelled = true;
                break;
            }

            if blocked.contains(&item.entity_id) {
                report.skipped += 1;
            } else if trigger == SyncTrigger::Automatic && !self.is_due(item) {
                blocked.insert(item.entity_id);
                report.skipped += 1;
            } else {
                let was_exhausted = item.is_exhausted(max_attempts);
                self.lock_in_flight().insert(item.entity_id);
                let outcome = self.push_item(token, item).await;
                self.lock_in_flight().remove(&item.entity_id);

                match outcome? {
                    settled @ (ItemOutcome::Pushed | ItemOutcome::Skipped) => {
                        if matches!(settled, ItemOutcome::Pushed) {
                            report.pushed += 1;
                        } else {
                            report.skipped += 1;
                        }
                        counts.pending = counts.pending.saturating_sub(1);
                        if was_exhausted {
                            counts.errors = counts.errors.saturating_sub(1);
                        }
                    }
                    ItemOutcome::Conflict => {
                        report.conflicts += 1;
                        blocked.insert(item.entity_id);
                        // Every remaining item of the entity went into the record
                        for folded in queue[index..]
                            .iter()
                            .filter(|queued| queued.entity_id == item.entity_id)
                        {
                            counts.pending = counts.pending.saturating_sub(1);
                            if folded.is_exhausted(max_attempts) {
                                counts.errors = counts.errors.saturating_sub(1);
                            }
                        }
                        counts.conflicts += 1;
                    }
                    ItemOutcome::Failed { message, exhausted } => {
                        report.failed += 1;
                        report.errors.push(message);
                        blocked.insert(item.entity_id);
                        if exhausted && !was_exhausted {
                            counts.errors += 1;
                        }
                    }
                }
            }

            self.advance_progress(counts);
        }
        Ok(())
    }

    /// Whether an automatic cycle may send this item now
    fn is_due(&self, item: &PendingMutation) -> bool {
        if item.is_exhausted(self.queue_backoff.max_retries) {
            return false;
        }
        self.lock_backoff()
            .get(&item.id)
            .map_or(true, |not_before| Instant::now() >= *not_before)
    }

    async fn push_item(&self, token: &str, item: &PendingMutation) -> Result<ItemOutcome> {
        let local = self.store.get(&item.entity_id)?;
        let id = item.entity_id.to_string();

        let sent = match (item.action, local.as_ref()) {
            (MutationAction::Delete, Some(snapshot)) if snapshot.server_version.is_none() => {
                // Never reached the server, nothing to delete remotely
                self.store.discard(&item.entity_id)?;
                self.clear_backoff(&item.id);
                tracing::debug!("Discarded unsynced evaluation {id}");
                return Ok(ItemOutcome::Pushed);
            }
            (MutationAction::Delete, _) => self.remote.delete(token, &id).await.map(|()| None),
            (_, None) => {
                tracing::debug!("Skipping queue item {} for missing evaluation {id}", item.id);
                self.store.remove_from_queue(&item.id)?;
                return Ok(ItemOutcome::Skipped);
            }
            (_, Some(snapshot)) => {
                let data = item.payload.as_ref().unwrap_or(&snapshot.data);
                match snapshot.server_version {
                    Some(expected) => self
                        .remote
                        .update(token, &id, data, expected)
                        .await
                        .map(Some),
                    None => self.remote.create(token, &id, data).await.map(Some),
                }
            }
        };

        match sent {
            Ok(server) => {
                self.confirm(item, server)?;
                Ok(ItemOutcome::Pushed)
            }
            Err(RemoteError::Conflict(server)) => self.raise_conflict(item, local, server),
            Err(RemoteError::Unauthorized) => Err(Error::Unauthenticated),
            Err(error) if error.is_retryable() => self.record_transient_failure(item, &error),
            Err(error) => self.record_rejection(item, &error),
        }
    }

    /// Apply a server confirmation for `item`
    fn confirm(&self, item: &PendingMutation, server: Option<RemoteEntity>) -> Result<()> {
        let actor = self.actor();
        let id = item.entity_id.to_string();
        self.clear_backoff(&item.id);

        let Some(server) = server else {
            self.store.discard(&item.entity_id)?;
            self.record_version(&id, &Value::Null, &actor, "deleted");
            self.audit.log(
                AuditEntry::new(&actor, AuditAction::Delete, EVALUATION_RESOURCE)
                    .with_resource_id(&id)
                    .with_details(json!({ "phase": "synced" })),
            );
            return Ok(());
        };

        // Re-read: the user may have edited or deleted while the request was
        // in flight. A delete during the send leaves a tombstone behind.
        let Some(mut snapshot) = self.store.get(&item.entity_id)? else {
            tracing::debug!("Evaluation {id} was cleared locally before {} was confirmed", item.id);
            self.store.remove_from_queue(&item.id)?;
            return Ok(());
        };
        let newer_local_changes = self
            .store
            .dequeue_all()?
            .iter()
            .any(|queued| queued.entity_id == item.entity_id && queued.id != item.id);

        if newer_local_changes {
            snapshot.server_version = Some(
                snapshot
                    .server_version
                    .map_or(server.version, |current| current.max(server.version)),
            );
        } else {
            snapshot.adopt_remote(&server);
        }
        self.store.mark_synced(&snapshot, &item.id)?;

        self.record_version(&id, &server.data, &actor, item.action.as_str());
        self.audit.log(
            AuditEntry::new(&actor, audit_action(item.action), EVALUATION_RESOURCE)
                .with_resource_id(&id)
                .with_details(json!({
                    "phase": "synced",
                    "serverVersion": server.version,
                })),
        );
        tracing::debug!("Synced {} of {id} at version {}", item.action, server.version);
        Ok(())
    }

    fn raise_conflict(
        &self,
        item: &PendingMutation,
        sent: Option<EntitySnapshot>,
        server: RemoteEntity,
    ) -> Result<ItemOutcome> {
        let mut snapshot = match self.store.get(&item.entity_id)?.or(sent) {
            Some(snapshot) => snapshot,
            None => EntitySnapshot::with_id(
                item.entity_id,
                item.payload.clone().unwrap_or(Value::Null),
            ),
        };
        snapshot.sync_status = SyncStatus::Conflict;
        let expected = snapshot.server_version;
        let conflict = ConflictRecord::new(EVALUATION_RESOURCE, snapshot.clone(), server);

        if let Err(error) = self.store.raise_conflict(&snapshot, &conflict) {
            return match error {
                Error::UnresolvedConflict(_) => {
                    tracing::warn!("Evaluation {} already has an open conflict", item.entity_id);
                    Ok(ItemOutcome::Failed {
                        message: error.to_string(),
                        exhausted: false,
                    })
                }
                other => Err(other),
            };
        }
        self.clear_backoff(&item.id);

        tracing::warn!(
            "Conflict on evaluation {}: expected version {expected:?}, server at {}",
            item.entity_id,
            conflict.remote_snapshot.version
        );
        let actor = self.actor();
        self.audit.log(
            AuditEntry::new(&actor, AuditAction::SyncConflict, EVALUATION_RESOURCE)
                .with_resource_id(item.entity_id.to_string())
                .with_details(json!({
                    "conflictId": conflict.id.to_string(),
                    "action": item.action.as_str(),
                    "expectedVersion": expected,
                    "serverVersion": conflict.remote_snapshot.version,
                    "localVersion": snapshot.local_version,
                })),
        );
        Ok(ItemOutcome::Conflict)
    }

    fn record_transient_failure(
        &self,
        item: &PendingMutation,
        error: &RemoteError,
    ) -> Result<ItemOutcome> {
        let mut updated = item.clone();
        updated.retry_count = updated.retry_count.saturating_add(1);
        self.store.update_queue_item(&updated)?;

        let delay = self.queue_backoff.delay_for_attempt(item.retry_count);
        self.lock_backoff().insert(item.id, Instant::now() + delay);

        let exhausted = updated.is_exhausted(self.queue_backoff.max_retries);
        if exhausted {
            tracing::warn!(
                "Queue item {} for {} failed {} times, waiting for a manual sync: {error}",
                item.id,
                item.entity_id,
                updated.retry_count
            );
        } else {
            tracing::warn!(
                "Queue item {} for {} failed (attempt {}), retrying in {delay:?}: {error}",
                item.id,
                item.entity_id,
                updated.retry_count
            );
        }
        Ok(ItemOutcome::Failed {
            message: format!("{} {}: {error}", item.action, item.entity_id),
            exhausted,
        })
    }

    /// Permanent rejection: stays queued but only a manual sync retries it
    fn record_rejection(&self, item: &PendingMutation, error: &RemoteError) -> Result<ItemOutcome> {
        let mut updated = item.clone();
        updated.retry_count = updated.retry_count.max(self.queue_backoff.max_retries);
        self.store.update_queue_item(&updated)?;

        tracing::warn!(
            "Remote authority rejected {} of {}: {error}",
            item.action,
            item.entity_id
        );
        let actor = self.actor();
        self.audit.log(
            AuditEntry::new(&actor, audit_action(item.action), EVALUATION_RESOURCE)
                .with_resource_id(item.entity_id.to_string())
                .with_details(json!({ "phase": "synced" }))
                .failed(error.to_string()),
        );
        Ok(ItemOutcome::Failed {
            message: format!("{} {}: {error}", item.action, item.entity_id),
            exhausted: true,
        })
    }

    fn clear_backoff(&self, id: &MutationId) {
        self.lock_backoff().remove(id);
    }

    pub(super) fn record_version(&self, id: &str, data: &Value, actor: &Actor, reason: &str) {
        if let Err(error) =
            self.versions
                .save_version(EVALUATION_RESOURCE, id, data, &actor.id, Some(reason), None)
        {
            tracing::error!("Failed to record version of evaluation {id}: {error}");
        }
    }

    async fn pull_changes(&self, token: &str, report: &mut SyncReport) -> Result<()> {
        let since = self
            .store
            .get_meta(META_LAST_PULL_AT)?
            .and_then(|raw| raw.parse::<i64>().ok());
        let changed = self.remote.fetch_changed_since(token, since).await?;
        let actor = self.actor();
        let mut cursor = since;

        for remote in &changed {
            cursor = Some(cursor.map_or(remote.updated_at, |current| current.max(remote.updated_at)));

            let Ok(entity_id) = remote.id.parse::<EntityId>() else {
                tracing::warn!("Ignoring remote evaluation with invalid id {}", remote.id);
                continue;
            };

            let applied = match self.store.get(&entity_id)? {
                None => {
                    let mut snapshot = EntitySnapshot::with_id(entity_id, Value::Null);
                    snapshot.local_version = 0;
                    snapshot.adopt_remote(remote);
                    Some(snapshot)
                }
                Some(mut local)
                    if local.sync_status == SyncStatus::Synced
                        && local
                            .server_version
                            .map_or(true, |current| remote.version > current) =>
                {
                    local.adopt_remote(remote);
                    Some(local)
                }
                Some(_) => None,
            };

            match applied {
                Some(snapshot) => {
                    self.store.put(&snapshot)?;
                    self.record_version(&remote.id, &remote.data, &actor, "pulled");
                    report.pulled += 1;
                }
                None => {
                    tracing::debug!("Kept local copy of {} over pulled version {}", remote.id, remote.version);
                }
            }
        }

        if let Some(cursor) = cursor {
            self.store.set_meta(META_LAST_PULL_AT, &cursor.to_string())?;
        }
        Ok(())
    }

    async fn upload_audit(&self, token: &str, report: &mut SyncReport) -> Result<()> {
        let mut cursor = self
            .store
            .get_meta(META_AUDIT_CURSOR)?
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);

        while !self.cancelled() {
            let batch = self.store.audit_since(cursor, self.audit_batch_size)?;
            if batch.is_empty() {
                break;
            }

            let accepted = self.remote.push_audit_batch(token, &batch).await?;
            let accepted: HashSet<&str> = accepted.iter().map(String::as_str).collect();
            // The cursor only moves past an unbroken run of accepted entries;
            // anything after the first rejection is sent again next cycle
            let confirmed = batch
                .iter()
                .take_while(|entry| accepted.contains(entry.id.as_str()))
                .count();

            if confirmed > 0 {
                cursor = batch[confirmed - 1].seq;
                self.store.set_meta(META_AUDIT_CURSOR, &cursor.to_string())?;
            }
            report.audit_uploaded += confirmed;

            if confirmed < batch.len() {
                tracing::warn!(
                    "Remote authority accepted {} of {} audit entries",
                    accepted.len(),
                    batch.len()
                );
                report.errors.push(format!(
                    "audit upload: {} of {} entries not accepted",
                    batch.len() - confirmed,
                    batch.len()
                ));
                break;
            }
            if batch.len() < self.audit_batch_size {
                break;
            }
        }
        Ok(())
    }

    /// Run automatic cycles on `interval` and whenever woken.
    ///
    /// Without an interval the worker only reacts to `request_sync` and
    /// connectivity changes.
    pub fn spawn_worker(self: &Arc<Self>, interval: Option<Duration>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!("Sync worker started (interval {interval:?})");
            loop {
                match interval {
                    Some(period) => {
                        tokio::select! {
                            () = tokio::time::sleep(period) => {}
                            () = engine.wake.notified() => {}
                        }
                    }
                    None => engine.wake.notified().await,
                }

                if engine.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(error) = engine.sync_now(SyncTrigger::Automatic).await {
                    tracing::warn!("Background sync failed: {error}");
                }
            }
            tracing::debug!("Sync worker stopped");
        })
    }

    /// Stop the background worker and cancel the running cycle
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

const fn audit_action(action: MutationAction) -> AuditAction {
    match action {
        MutationAction::Create => AuditAction::Create,
        MutationAction::Update => AuditAction::Update,
        MutationAction::Delete => AuditAction::Delete,
    }
}
