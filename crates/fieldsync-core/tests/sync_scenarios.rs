//! End-to-end sync behaviour against the in-memory remote authority.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use fieldsync_core::config::{EngineConfig, RetryPolicy};
use fieldsync_core::export::ExportFormat;
use fieldsync_core::models::{
    Actor, AuditAction, AuditEntry, AuditFilter, EntityId, MutationAction, Resolution,
    SyncStatus, EVALUATION_RESOURCE,
};
use fieldsync_core::remote::memory::InMemoryRemote;
use fieldsync_core::remote::{RemoteApi, RemoteEntity, RemoteResult};
use fieldsync_core::services::StorageService;
use fieldsync_core::sync::{SyncOutcome, SyncReport, SyncState, SyncTrigger};
use fieldsync_core::{Error, FieldSync};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Notify;

fn app(remote: &Arc<InMemoryRemote>) -> FieldSync {
    app_with(Arc::clone(remote) as _)
}

fn app_with(remote: Arc<dyn RemoteApi>) -> FieldSync {
    let config = EngineConfig::new("http://127.0.0.1:9")
        .unwrap()
        .with_queue_backoff(RetryPolicy::immediate(5))
        .without_auto_sync();
    let app = FieldSync::with_parts(
        StorageService::open_in_memory(),
        remote,
        Some(config),
    );
    app.session()
        .login(Actor::new("agent-1", "Agent One"), "token");
    app
}

async fn sync(app: &FieldSync, trigger: SyncTrigger) -> SyncReport {
    match app.engine().sync_now(trigger).await.unwrap() {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

/// Pull a server-side entity at `version` so the device knows it
async fn seeded_entity(app: &FieldSync, remote: &InMemoryRemote, version: i64) -> EntityId {
    let id = EntityId::new();
    remote.insert(id.to_string(), version, json!({"score": 1, "notes": "intake"}));
    let report = sync(app, SyncTrigger::Manual).await;
    assert_eq!(report.pulled, 1);
    id
}

fn creates_sent(remote: &InMemoryRemote) -> usize {
    remote
        .calls()
        .iter()
        .filter(|call| call.operation == "create")
        .count()
}

/// In-memory authority that lets a test act while a request is in flight
struct InterceptingRemote {
    inner: InMemoryRemote,
    create_hook: OnceLock<Box<dyn Fn(&str) + Send + Sync>>,
    create_gate: Mutex<Option<Arc<Notify>>>,
    create_entered: Notify,
    audit_limit: Mutex<Option<usize>>,
}

impl InterceptingRemote {
    fn new() -> Self {
        Self {
            inner: InMemoryRemote::new(),
            create_hook: OnceLock::new(),
            create_gate: Mutex::new(None),
            create_entered: Notify::new(),
            audit_limit: Mutex::new(None),
        }
    }

    /// Run `hook` after every create reaches the server, before the reply
    fn after_create(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        assert!(self.create_hook.set(Box::new(hook)).is_ok(), "hook already set");
    }

    /// Hold the next create until the returned gate is notified
    fn hold_next_create(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Accept at most `limit` entries of every audit batch
    fn limit_audit(&self, limit: Option<usize>) {
        *self.audit_limit.lock().unwrap() = limit;
    }
}

#[async_trait]
impl RemoteApi for InterceptingRemote {
    async fn fetch_changed_since(
        &self,
        token: &str,
        since: Option<i64>,
    ) -> RemoteResult<Vec<RemoteEntity>> {
        self.inner.fetch_changed_since(token, since).await
    }

    async fn create(&self, token: &str, id: &str, data: &Value) -> RemoteResult<RemoteEntity> {
        let gate = self.create_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.create_entered.notify_one();
            gate.notified().await;
        }

        let created = self.inner.create(token, id, data).await;
        if let Some(hook) = self.create_hook.get() {
            hook(id);
        }
        created
    }

    async fn update(
        &self,
        token: &str,
        id: &str,
        data: &Value,
        expected_version: i64,
    ) -> RemoteResult<RemoteEntity> {
        self.inner.update(token, id, data, expected_version).await
    }

    async fn delete(&self, token: &str, id: &str) -> RemoteResult<()> {
        self.inner.delete(token, id).await
    }

    async fn push_audit_batch(
        &self,
        token: &str,
        entries: &[AuditEntry],
    ) -> RemoteResult<Vec<String>> {
        let limit = *self.audit_limit.lock().unwrap();
        let accepted = limit.map_or(entries, |limit| &entries[..limit.min(entries.len())]);
        self.inner.push_audit_batch(token, accepted).await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_update_becomes_conflict_record() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let id = seeded_entity(&app, &remote, 3).await;

    app.evaluations()
        .update(&id, json!({"score": 2, "notes": "intake"}))
        .unwrap();
    let queued = app.store().dequeue_all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].action, MutationAction::Update);
    assert_eq!(app.store().get(&id).unwrap().unwrap().server_version, Some(3));

    remote.edit_as_other_actor(&id.to_string(), json!({"score": 9, "notes": "supervisor"}));

    let report = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pushed, 0);

    let conflicts = app.engine().list_unresolved().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].entity_id, id);
    assert_eq!(conflicts[0].remote_snapshot.version, 4);
    assert!(app.store().dequeue_all().unwrap().is_empty());
    assert_eq!(
        app.store().get(&id).unwrap().unwrap().sync_status,
        SyncStatus::Conflict
    );
    assert_eq!(app.engine().status().conflict_count, 1);

    let conflict_audits = app
        .audit()
        .query(&AuditFilter {
            action: Some(AuditAction::SyncConflict),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(conflict_audits.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn keeping_remote_adopts_server_snapshot_and_retains_loser() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let id = seeded_entity(&app, &remote, 3).await;
    app.evaluations()
        .update(&id, json!({"score": 2, "notes": "intake"}))
        .unwrap();
    remote.edit_as_other_actor(&id.to_string(), json!({"score": 9, "notes": "supervisor"}));
    sync(&app, SyncTrigger::Manual).await;

    let conflict = app.engine().list_unresolved().unwrap().remove(0);
    let diff = app.engine().conflict_diff(&conflict.id).unwrap();
    assert_eq!(diff.len(), 2);

    let versions_before = app.evaluations().history(&id).unwrap().len();
    let resolved = app
        .engine()
        .resolve(&conflict.id, Resolution::Remote)
        .await
        .unwrap();

    assert_eq!(resolved.data, json!({"score": 9, "notes": "supervisor"}));
    assert_eq!(resolved.server_version, Some(4));
    assert_eq!(resolved.sync_status, SyncStatus::Synced);

    let stored = app.engine().get_conflict(&conflict.id).unwrap();
    assert_eq!(stored.resolution, Some(Resolution::Remote));
    assert_eq!(stored.resolved_by.as_deref(), Some("agent-1"));
    assert_eq!(
        stored.losing_data(),
        Some(&json!({"score": 2, "notes": "intake"}))
    );

    let history = app.evaluations().history(&id).unwrap();
    assert_eq!(history.len(), versions_before + 1);
    assert_eq!(
        history[0].change_reason.as_deref(),
        Some("conflict resolved: kept remote")
    );
    let resolutions = app
        .audit()
        .query(&AuditFilter {
            action: Some(AuditAction::ConflictResolved),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(resolutions.len(), 1);

    assert!(matches!(
        app.engine().resolve(&conflict.id, Resolution::Local).await,
        Err(Error::AlreadyResolved(_))
    ));
    assert!(app.engine().list_unresolved().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn keeping_local_pushes_against_remote_version() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let id = seeded_entity(&app, &remote, 3).await;
    app.evaluations()
        .update(&id, json!({"score": 2, "notes": "intake"}))
        .unwrap();
    remote.edit_as_other_actor(&id.to_string(), json!({"score": 9}));
    sync(&app, SyncTrigger::Manual).await;
    let conflict = app.engine().list_unresolved().unwrap().remove(0);

    let resolved = app
        .engine()
        .resolve(&conflict.id, Resolution::Local)
        .await
        .unwrap();

    let server = remote.get(&id.to_string()).unwrap();
    assert_eq!(server.version, 5);
    assert_eq!(server.data, json!({"score": 2, "notes": "intake"}));
    assert_eq!(resolved.server_version, Some(5));
    assert_eq!(resolved.sync_status, SyncStatus::Synced);
    assert_eq!(
        app.engine().get_conflict(&conflict.id).unwrap().losing_data(),
        Some(&json!({"score": 9}))
    );

    // The entity is editable again
    app.evaluations().update(&id, json!({"score": 3})).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn keeping_local_after_another_server_change_keeps_conflict_open() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let id = seeded_entity(&app, &remote, 1).await;
    app.evaluations().update(&id, json!({"score": 2})).unwrap();
    remote.edit_as_other_actor(&id.to_string(), json!({"score": 7}));
    sync(&app, SyncTrigger::Manual).await;
    let conflict = app.engine().list_unresolved().unwrap().remove(0);

    remote.edit_as_other_actor(&id.to_string(), json!({"score": 8}));
    assert!(matches!(
        app.engine().resolve(&conflict.id, Resolution::Local).await,
        Err(Error::Conflict {
            server_version: 3,
            ..
        })
    ));

    let refreshed = app.engine().get_conflict(&conflict.id).unwrap();
    assert!(!refreshed.is_resolved());
    assert_eq!(refreshed.remote_snapshot.version, 3);

    app.engine()
        .resolve(&conflict.id, Resolution::Local)
        .await
        .unwrap();
    assert_eq!(remote.get(&id.to_string()).unwrap().data, json!({"score": 2}));
}

#[tokio::test(flavor = "multi_thread")]
async fn resolving_unknown_conflict_is_not_found() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let missing = fieldsync_core::models::ConflictId::new();

    assert!(matches!(
        app.engine().resolve(&missing, Resolution::Remote).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn persistent_network_failure_stops_automatic_retries() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let created = app.evaluations().create(json!({"score": 1})).unwrap();

    let seen_error_counts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen_error_counts);
    let subscription = app.engine().subscribe(move |status| {
        sink.lock().unwrap().push(status.error_count);
    });

    remote.set_reachable(false);
    for _ in 0..5 {
        sync(&app, SyncTrigger::Automatic).await;
    }

    let queue = app.store().dequeue_all().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].retry_count, 5);
    assert_eq!(
        app.store().get(&created.id).unwrap().unwrap().sync_status,
        SyncStatus::Pending
    );
    assert_eq!(app.engine().status().error_count, 1);
    {
        let seen = seen_error_counts.lock().unwrap();
        assert_eq!(seen.iter().copied().max(), Some(1));
        assert_eq!(seen.last(), Some(&1));
    }

    let attempts = creates_sent(&remote);
    assert_eq!(attempts, 5);
    remote.set_reachable(true);
    let automatic = sync(&app, SyncTrigger::Automatic).await;
    assert_eq!(automatic.pushed, 0);
    assert_eq!(creates_sent(&remote), attempts);

    let manual = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(manual.pushed, 1);
    assert_eq!(app.engine().status().error_count, 0);
    assert_eq!(
        app.store().get(&created.id).unwrap().unwrap().sync_status,
        SyncStatus::Synced
    );
    subscription.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_edits_replay_in_order() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    app.engine().set_online(false);

    let evaluations = app.evaluations();
    let created = evaluations.create(json!({"score": 1})).unwrap();
    evaluations
        .update(&created.id, json!({"score": 2, "visit": "home"}))
        .unwrap();
    evaluations
        .update(&created.id, json!({"score": 3, "visit": "home"}))
        .unwrap();
    evaluations.update(&created.id, json!({"score": 4})).unwrap();

    assert_eq!(
        app.engine().sync_now(SyncTrigger::Manual).await.unwrap(),
        SyncOutcome::Offline
    );
    assert!(remote.calls().is_empty());
    assert_eq!(app.engine().status().status, SyncState::Offline);
    assert_eq!(app.engine().status().pending_count, 4);

    app.engine().set_online(true);
    let report = sync(&app, SyncTrigger::Automatic).await;
    assert_eq!(report.pushed, 4);
    assert_eq!(report.conflicts, 0);

    let server = remote.get(&created.id.to_string()).unwrap();
    let local = app.store().get(&created.id).unwrap().unwrap();
    assert_eq!(server.data, json!({"score": 4}));
    assert_eq!(local.data, server.data);
    assert_eq!(local.server_version, Some(server.version));
    assert_eq!(server.version, 4);
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(local.local_version, 4);

    let history = evaluations.history(&created.id).unwrap();
    let numbers: Vec<i64> = history.iter().map(|entry| entry.version).collect();
    assert_eq!(numbers, vec![4, 3, 2, 1]);
    assert!(history[3].diff.is_none());
    assert!(history[0].diff.as_ref().unwrap().get("visit").unwrap().is_removal());

    let status = app.engine().status();
    assert_eq!(status.status, SyncState::Idle);
    assert_eq!(status.pending_count, 0);
    assert!(status.last_sync_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_of_synced_record_reaches_server() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let id = seeded_entity(&app, &remote, 2).await;

    app.evaluations().delete(&id).unwrap();
    assert_eq!(app.evaluations().get(&id).unwrap(), None);

    let report = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(remote.get(&id.to_string()), None);
    assert_eq!(app.store().get(&id).unwrap(), None);

    let latest = app
        .versions()
        .latest(EVALUATION_RESOURCE, &id.to_string())
        .unwrap()
        .unwrap();
    assert_eq!(latest.data, serde_json::Value::Null);
    assert_eq!(latest.change_reason.as_deref(), Some("deleted"));
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_applies_remote_changes_but_keeps_pending_local_edits() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let untouched = seeded_entity(&app, &remote, 1).await;
    let edited = EntityId::new();
    remote.insert(edited.to_string(), 1, json!({"score": 5}));
    sync(&app, SyncTrigger::Manual).await;

    app.evaluations().update(&edited, json!({"score": 6})).unwrap();
    remote.edit_as_other_actor(&untouched.to_string(), json!({"score": 10}));

    // The queue drains before the pull, so the edit wins at version 1
    let report = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(report.pushed, 1);
    assert_eq!(report.pulled, 1);

    let pulled = app.store().get(&untouched).unwrap().unwrap();
    assert_eq!(pulled.data, json!({"score": 10}));
    assert_eq!(pulled.server_version, Some(2));
    assert_eq!(pulled.sync_status, SyncStatus::Synced);
    assert_eq!(
        app.store().get(&edited).unwrap().unwrap().data,
        json!({"score": 6})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_entries_are_uploaded_once() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    app.evaluations().create(json!({"score": 1})).unwrap();

    sync(&app, SyncTrigger::Manual).await;
    let uploaded = remote.received_audit();
    let actions: Vec<AuditAction> = uploaded.iter().map(|entry| entry.action).collect();
    assert!(actions.contains(&AuditAction::Login));
    assert!(actions.contains(&AuditAction::Create));
    assert!(uploaded
        .iter()
        .all(|entry| entry.client_context.as_deref() == Some(app.device_id())));

    sync(&app, SyncTrigger::Manual).await;
    assert_eq!(remote.received_audit().len(), uploaded.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn logout_then_login_pulls_everything_again() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let id = seeded_entity(&app, &remote, 1).await;

    app.session().logout().unwrap();
    assert!(app.evaluations().list().unwrap().is_empty());
    assert!(matches!(
        app.engine().sync_now(SyncTrigger::Manual).await,
        Err(Error::Unauthenticated)
    ));

    app.session().login(Actor::new("agent-2", "Agent Two"), "token");
    let report = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(report.pulled, 1);
    assert!(app.store().get(&id).unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_token_fails_the_cycle() {
    let remote = Arc::new(InMemoryRemote::new().with_required_token("right"));
    let app = app(&remote);
    app.evaluations().create(json!({})).unwrap();

    assert!(matches!(
        app.engine().sync_now(SyncTrigger::Manual).await,
        Err(Error::Unauthenticated)
    ));
    let queue = app.store().dequeue_all().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].retry_count, 0);
    assert!(app.engine().status().last_error.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn background_worker_syncs_when_woken() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let created = app.evaluations().create(json!({"score": 1})).unwrap();
    let mut status = app.engine().watch();
    let worker = app.start();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            status.changed().await.unwrap();
            let current = status.borrow_and_update().clone();
            if current.status == SyncState::Idle && current.pending_count == 0 {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        app.store().get(&created.id).unwrap().unwrap().sync_status,
        SyncStatus::Synced
    );
    app.engine().shutdown();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn restore_appends_version_and_syncs_old_data() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);
    let evaluations = app.evaluations();
    let created = evaluations.create(json!({"score": 1})).unwrap();
    sync(&app, SyncTrigger::Manual).await;
    evaluations.update(&created.id, json!({"score": 2})).unwrap();
    sync(&app, SyncTrigger::Manual).await;

    let before = evaluations.history(&created.id).unwrap().len();
    let restored = evaluations.restore(&created.id, 1).unwrap();
    assert_eq!(restored.data, json!({"score": 1}));

    let history = evaluations.history(&created.id).unwrap();
    assert_eq!(history.len(), before + 1);
    assert_eq!(history[0].data, history[before].data);
    assert_eq!(
        history[0].change_reason.as_deref(),
        Some("restored from version 1")
    );

    sync(&app, SyncTrigger::Manual).await;
    let server = remote.get(&created.id.to_string()).unwrap();
    assert_eq!(server.data, json!({"score": 1}));
    assert_eq!(server.version, 3);

    assert!(matches!(
        evaluations.restore(&created.id, 99),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_export_without_matches_is_header_only() {
    let remote = Arc::new(InMemoryRemote::new());
    let app = app(&remote);

    let file = app
        .audit()
        .export_matching(
            &app.session().actor(),
            &AuditFilter {
                action: Some(AuditAction::ConsentRevoked),
                ..AuditFilter::default()
            },
            ExportFormat::Csv,
        )
        .unwrap();

    let text = String::from_utf8(file.bytes).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.starts_with("id,timestamp,actor_id"));
    assert!(file.file_name.ends_with(".csv"));

    let exports = app
        .audit()
        .query(&AuditFilter {
            action: Some(AuditAction::Export),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(exports.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_while_create_is_in_flight_is_not_resurrected() {
    let remote = Arc::new(InterceptingRemote::new());
    let app = app_with(Arc::clone(&remote) as _);
    let created = app.evaluations().create(json!({"score": 2})).unwrap();
    let evaluations = app.evaluations().clone();
    remote.after_create(move |id| {
        evaluations.delete(&id.parse().unwrap()).unwrap();
    });

    let first = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(first.pushed, 1);
    assert!(remote.inner.get(&created.id.to_string()).is_some());
    assert!(app.evaluations().list().unwrap().is_empty());
    assert_eq!(app.evaluations().get(&created.id).unwrap(), None);

    let tombstone = app.store().get(&created.id).unwrap().unwrap();
    assert!(tombstone.is_deleted);
    assert_eq!(tombstone.server_version, Some(1));
    let queue = app.store().dequeue_all().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].action, MutationAction::Delete);

    let second = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(second.pushed, 1);
    assert_eq!(remote.inner.get(&created.id.to_string()), None);
    assert_eq!(app.store().get(&created.id).unwrap(), None);
    assert!(app.store().dequeue_all().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_entries_after_a_rejection_are_sent_again() {
    let remote = Arc::new(InterceptingRemote::new());
    let app = app_with(Arc::clone(&remote) as _);
    app.evaluations().create(json!({"score": 1})).unwrap();
    remote.limit_audit(Some(1));

    let first = sync(&app, SyncTrigger::Manual).await;
    assert_eq!(first.pushed, 1);
    assert_eq!(first.audit_uploaded, 1);
    assert!(first.errors.iter().any(|error| error.contains("not accepted")));
    assert_eq!(remote.inner.received_audit().len(), 1);

    remote.limit_audit(None);
    let second = sync(&app, SyncTrigger::Manual).await;
    assert!(second.errors.is_empty());

    let local: HashSet<String> = app
        .store()
        .query_audit(&AuditFilter::default())
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    let received: Vec<String> = remote
        .inner
        .received_audit()
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(received.len(), local.len());
    assert_eq!(received.into_iter().collect::<HashSet<_>>(), local);
}

#[tokio::test(flavor = "multi_thread")]
async fn going_offline_mid_cycle_stops_after_current_item() {
    let remote = Arc::new(InterceptingRemote::new());
    let app = app_with(Arc::clone(&remote) as _);
    for score in 0..3 {
        app.evaluations().create(json!({ "score": score })).unwrap();
    }
    let engine = Arc::clone(app.engine());
    remote.after_create(move |_| engine.set_online(false));

    let report = sync(&app, SyncTrigger::Manual).await;
    assert!(report.cancelled);
    assert_eq!(report.pushed, 1);
    assert_eq!(remote.inner.calls().len(), 1);
    assert_eq!(creates_sent(&remote.inner), 1);
    assert_eq!(app.store().dequeue_all().unwrap().len(), 2);
    assert_eq!(app.engine().status().status, SyncState::Offline);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_sync_requests_are_coalesced() {
    let remote = Arc::new(InterceptingRemote::new());
    let app = app_with(Arc::clone(&remote) as _);
    app.evaluations().create(json!({"score": 1})).unwrap();
    app.evaluations().create(json!({"score": 2})).unwrap();
    let gate = remote.hold_next_create();

    let engine = Arc::clone(app.engine());
    let running = tokio::spawn(async move { engine.sync_now(SyncTrigger::Manual).await });
    remote.create_entered.notified().await;

    assert_eq!(
        app.engine().sync_now(SyncTrigger::Automatic).await.unwrap(),
        SyncOutcome::Coalesced
    );
    assert!(app.engine().is_running());
    gate.notify_one();

    let report = match running.await.unwrap().unwrap() {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    };
    assert_eq!(report.pushed, 2);
    assert_eq!(creates_sent(&remote.inner), 2);
    assert!(app.store().dequeue_all().unwrap().is_empty());
    assert!(!app.engine().is_running());
}
