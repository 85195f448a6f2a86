//! Wiring of store, remote client, versions, audit and sync engine.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use super::evaluations::EvaluationService;
use super::session::SessionService;
use super::storage::{StorageMode, StorageService};
use crate::audit::AuditLog;
use crate::config::EngineConfig;
use crate::db::{LocalStore, META_DEVICE_ID};
use crate::remote::{HttpRemoteClient, LocalOnlyRemote, RemoteApi};
use crate::sync::SyncEngine;
use crate::versions::VersionStore;
use crate::Result;

/// One device's fieldsync instance
#[derive(Clone)]
pub struct FieldSync {
    storage: StorageService,
    device_id: String,
    versions: Arc<VersionStore>,
    audit: Arc<AuditLog>,
    engine: Arc<SyncEngine>,
    evaluations: EvaluationService,
    session: SessionService,
    config: Option<EngineConfig>,
}

impl FieldSync {
    /// Open the database at `db_path` and talk HTTP to `config.api_base_url`
    pub fn open(db_path: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        let storage = StorageService::open_path(db_path);
        let device_id = resolve_device_id(storage.store().as_ref(), &config);
        let remote = Arc::new(HttpRemoteClient::new(&config, device_id.clone())?);
        Ok(Self::assemble(storage, remote, device_id, Some(config)))
    }

    /// Open the database at `db_path` without a remote authority.
    ///
    /// The engine starts offline; local writes queue up until the device is
    /// reopened with a configuration.
    pub fn open_local(db_path: impl Into<PathBuf>) -> Self {
        let app = Self::with_parts(
            StorageService::open_path(db_path),
            Arc::new(LocalOnlyRemote),
            None,
        );
        app.engine.set_online(false);
        app
    }

    /// Build from already-opened parts
    pub fn with_parts(
        storage: StorageService,
        remote: Arc<dyn RemoteApi>,
        config: Option<EngineConfig>,
    ) -> Self {
        let device_id = match &config {
            Some(config) => resolve_device_id(storage.store().as_ref(), config),
            None => stored_or_new_device_id(storage.store().as_ref()),
        };
        Self::assemble(storage, remote, device_id, config)
    }

    /// In-memory instance against the given remote (tests, demos)
    pub fn in_memory(remote: Arc<dyn RemoteApi>) -> Self {
        Self::with_parts(StorageService::open_in_memory(), remote, None)
    }

    fn assemble(
        storage: StorageService,
        remote: Arc<dyn RemoteApi>,
        device_id: String,
        config: Option<EngineConfig>,
    ) -> Self {
        let store = storage.store();
        let versions = Arc::new(VersionStore::new(Arc::clone(&store)));
        let audit =
            Arc::new(AuditLog::new(Arc::clone(&store)).with_client_context(device_id.clone()));

        let mut engine = SyncEngine::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&versions),
            Arc::clone(&audit),
        )
        .with_storage_degraded(storage.mode().is_degraded());
        if let Some(config) = &config {
            engine = engine.with_config(config);
        }
        let engine = Arc::new(engine);

        let evaluations = EvaluationService::new(
            Arc::clone(&store),
            Arc::clone(&versions),
            Arc::clone(&audit),
            Arc::clone(&engine),
        );
        let session = SessionService::new(store, Arc::clone(&audit), Arc::clone(&engine));

        Self {
            storage,
            device_id,
            versions,
            audit,
            engine,
            evaluations,
            session,
            config,
        }
    }

    /// Start the background sync worker
    pub fn start(&self) -> JoinHandle<()> {
        let interval = self
            .config
            .as_ref()
            .and_then(|config| config.auto_sync_interval);
        self.engine.spawn_worker(interval)
    }

    /// Prune the audit log to the configured retention
    pub fn prune_audit(&self) -> Result<usize> {
        let Some(config) = &self.config else {
            return Ok(0);
        };
        self.audit.prune(config.audit_retention_days)
    }

    /// Configuration this instance was opened with; `None` when local-only
    pub const fn config(&self) -> Option<&EngineConfig> {
        self.config.as_ref()
    }

    pub const fn evaluations(&self) -> &EvaluationService {
        &self.evaluations
    }

    pub const fn session(&self) -> &SessionService {
        &self.session
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn store(&self) -> Arc<dyn LocalStore> {
        self.storage.store()
    }

    pub const fn storage_mode(&self) -> &StorageMode {
        self.storage.mode()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

fn resolve_device_id(store: &dyn LocalStore, config: &EngineConfig) -> String {
    config
        .device_id
        .clone()
        .unwrap_or_else(|| stored_or_new_device_id(store))
}

/// Device id persisted in metadata, generated on first use
fn stored_or_new_device_id(store: &dyn LocalStore) -> String {
    match store.get_meta(META_DEVICE_ID) {
        Ok(Some(device_id)) => return device_id,
        Ok(None) => {}
        Err(error) => tracing::warn!("Failed to read device id: {error}"),
    }

    let device_id = Uuid::now_v7().to_string();
    if let Err(error) = store.set_meta(META_DEVICE_ID, &device_id) {
        tracing::warn!("Failed to persist device id: {error}");
    }
    device_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::InMemoryRemote;
    use tempfile::tempdir;

    #[test]
    fn device_id_is_stable_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fieldsync.db");

        let first = FieldSync::with_parts(
            StorageService::open_path(&path),
            Arc::new(InMemoryRemote::new()),
            None,
        );
        let device_id = first.device_id().to_string();
        drop(first);

        let second = FieldSync::with_parts(
            StorageService::open_path(&path),
            Arc::new(InMemoryRemote::new()),
            None,
        );
        assert_eq!(second.device_id(), device_id);
    }

    #[test]
    fn local_only_instance_starts_offline_and_keeps_writes_queued() {
        let dir = tempdir().unwrap();
        let app = FieldSync::open_local(dir.path().join("fieldsync.db"));

        assert!(app.config().is_none());
        assert!(!app.engine().is_online());
        app.evaluations()
            .create(serde_json::json!({"score": 1}))
            .unwrap();
        assert_eq!(app.engine().status().pending_count, 1);
    }

    #[test]
    fn configured_device_id_wins() {
        let config = EngineConfig::new("https://api.example.org")
            .unwrap()
            .with_device_id("tablet-3");
        let app = FieldSync::with_parts(
            StorageService::open_in_memory(),
            Arc::new(InMemoryRemote::new()),
            Some(config),
        );
        assert_eq!(app.device_id(), "tablet-3");
    }

    #[test]
    fn degraded_storage_is_reported_in_status() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let app = FieldSync::with_parts(
            StorageService::open_path(blocker.join("fieldsync.db")),
            Arc::new(InMemoryRemote::new()),
            None,
        );
        assert!(app.storage_mode().is_degraded());
        assert!(app.engine().status().storage_degraded);
    }
}
