//! Local-first CRUD for evaluation records.
//!
//! Every write lands in the local store together with its queue item and
//! returns immediately; the sync engine delivers it later.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::audit::AuditLog;
use crate::db::LocalStore;
use crate::export::{ExportFile, ExportFormat};
use crate::models::{
    AuditAction, AuditEntry, EntityId, EntitySnapshot, MutationAction, PendingMutation,
    SyncStatus, VersionEntry, EVALUATION_RESOURCE,
};
use crate::sync::SyncEngine;
use crate::versions::{diff, VersionStore};
use crate::{Error, Result};

/// Evaluation records as the application sees them
#[derive(Clone)]
pub struct EvaluationService {
    store: Arc<dyn LocalStore>,
    versions: Arc<VersionStore>,
    audit: Arc<AuditLog>,
    engine: Arc<SyncEngine>,
}

impl EvaluationService {
    pub fn new(
        store: Arc<dyn LocalStore>,
        versions: Arc<VersionStore>,
        audit: Arc<AuditLog>,
        engine: Arc<SyncEngine>,
    ) -> Self {
        Self {
            store,
            versions,
            audit,
            engine,
        }
    }

    /// Create a new evaluation with a fresh id
    pub fn create(&self, data: Value) -> Result<EntitySnapshot> {
        self.create_with_id(EntityId::new(), data)
    }

    /// Create an evaluation with a caller-generated id
    pub fn create_with_id(&self, id: EntityId, data: Value) -> Result<EntitySnapshot> {
        validate_data(&data)?;
        if self.store.get(&id)?.is_some() {
            return Err(Error::InvalidInput(format!("evaluation {id} already exists")));
        }

        let snapshot = EntitySnapshot::with_id(id, data);
        let mutation =
            PendingMutation::new(id, MutationAction::Create, Some(snapshot.data.clone()));
        self.store.put_with_mutation(&snapshot, &mutation)?;

        self.log_local(AuditAction::Create, &id, json!({ "phase": "local" }));
        self.after_write();
        tracing::debug!("Created evaluation {id}");
        Ok(snapshot)
    }

    /// Replace an evaluation's data
    pub fn update(&self, id: &EntityId, data: Value) -> Result<EntitySnapshot> {
        validate_data(&data)?;
        let mut snapshot = self.require_editable(id)?;
        let changed: Vec<String> = diff(&snapshot.data, &data)
            .iter()
            .map(|(field, _)| field.clone())
            .collect();

        snapshot.apply_local_change(data);
        let mutation =
            PendingMutation::new(*id, MutationAction::Update, Some(snapshot.data.clone()));
        self.store.put_with_mutation(&snapshot, &mutation)?;

        self.log_local(
            AuditAction::Update,
            id,
            json!({ "phase": "local", "changedFields": changed }),
        );
        self.after_write();
        Ok(snapshot)
    }

    /// Delete an evaluation.
    ///
    /// Records the server never saw are dropped with their queue items;
    /// others become tombstones until the delete is confirmed. A record
    /// whose create is being sent counts as seen.
    pub fn delete(&self, id: &EntityId) -> Result<()> {
        let in_flight = self.engine.lock_in_flight();
        let mut snapshot = self.require_editable(id)?;
        let reaches_remote = snapshot.is_known_remotely() || in_flight.contains(id);

        if reaches_remote {
            snapshot.mark_deleted();
            let mutation = PendingMutation::new(*id, MutationAction::Delete, None);
            self.store.put_with_mutation(&snapshot, &mutation)?;
        } else {
            self.store.discard(id)?;
        }
        drop(in_flight);

        self.log_local(
            AuditAction::Delete,
            id,
            json!({ "phase": "local", "knownRemotely": reaches_remote }),
        );
        self.after_write();
        Ok(())
    }

    /// Fetch an evaluation; the read is audited
    pub fn get(&self, id: &EntityId) -> Result<Option<EntitySnapshot>> {
        let snapshot = self.store.get(id)?.filter(|snapshot| !snapshot.is_deleted);
        if snapshot.is_some() {
            self.audit.log(
                AuditEntry::new(&self.engine.actor(), AuditAction::Read, EVALUATION_RESOURCE)
                    .with_resource_id(id.to_string()),
            );
        }
        Ok(snapshot)
    }

    /// Every live evaluation, most recently updated first
    pub fn list(&self) -> Result<Vec<EntitySnapshot>> {
        Ok(self
            .store
            .get_all()?
            .into_iter()
            .filter(|snapshot| !snapshot.is_deleted)
            .collect())
    }

    pub fn list_by_status(&self, status: SyncStatus) -> Result<Vec<EntitySnapshot>> {
        Ok(self
            .store
            .get_by_status(status)?
            .into_iter()
            .filter(|snapshot| !snapshot.is_deleted)
            .collect())
    }

    /// Version history, newest first
    pub fn history(&self, id: &EntityId) -> Result<Vec<VersionEntry>> {
        self.versions.history(EVALUATION_RESOURCE, &id.to_string())
    }

    /// Bring back the data of an earlier version.
    ///
    /// Appends a restore entry to the history and queues the data as a
    /// regular update.
    pub fn restore(&self, id: &EntityId, version: i64) -> Result<EntitySnapshot> {
        let resource_id = id.to_string();
        let source = self
            .versions
            .get(EVALUATION_RESOURCE, &resource_id, version)?
            .ok_or_else(|| Error::NotFound(format!("version {version} of evaluation {id}")))?;
        let mut snapshot = self.require_editable(id)?;
        let actor = self.engine.actor();

        let entry = self
            .versions
            .restore(EVALUATION_RESOURCE, &resource_id, version, &actor.id)?;

        snapshot.apply_local_change(source.data);
        let mutation =
            PendingMutation::new(*id, MutationAction::Update, Some(snapshot.data.clone()));
        self.store.put_with_mutation(&snapshot, &mutation)?;

        self.audit.log(
            AuditEntry::new(&actor, AuditAction::Restore, EVALUATION_RESOURCE)
                .with_resource_id(&resource_id)
                .with_details(json!({
                    "fromVersion": version,
                    "newVersion": entry.version,
                })),
        );
        self.after_write();
        tracing::info!("Restored evaluation {id} to version {version}");
        Ok(snapshot)
    }

    /// Export one evaluation's history; the export is audited
    pub fn export_history(&self, id: &EntityId, format: ExportFormat) -> Result<ExportFile> {
        let resource_id = id.to_string();
        let file = self
            .versions
            .export(EVALUATION_RESOURCE, &resource_id, format)?;

        self.audit.log(
            AuditEntry::new(&self.engine.actor(), AuditAction::Export, EVALUATION_RESOURCE)
                .with_resource_id(&resource_id)
                .with_details(json!({
                    "format": format.extension(),
                    "fileName": file.file_name,
                })),
        );
        Ok(file)
    }

    fn require_editable(&self, id: &EntityId) -> Result<EntitySnapshot> {
        let snapshot = self
            .store
            .get(id)?
            .filter(|snapshot| !snapshot.is_deleted)
            .ok_or_else(|| Error::NotFound(format!("evaluation {id}")))?;

        if snapshot.sync_status == SyncStatus::Conflict
            || self.store.unresolved_conflict_for(id)?.is_some()
        {
            return Err(Error::UnresolvedConflict(id.to_string()));
        }
        Ok(snapshot)
    }

    fn log_local(&self, action: AuditAction, id: &EntityId, details: Value) {
        self.audit.log(
            AuditEntry::new(&self.engine.actor(), action, EVALUATION_RESOURCE)
                .with_resource_id(id.to_string())
                .with_details(details),
        );
    }

    fn after_write(&self) {
        self.engine.publish_status();
        self.engine.request_sync();
    }
}

fn validate_data(data: &Value) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(Error::InvalidInput(
            "evaluation data must be a JSON object".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{AuditFilter, ConflictRecord};
    use crate::remote::memory::InMemoryRemote;
    use crate::remote::RemoteEntity;

    fn service() -> (EvaluationService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let versions = Arc::new(VersionStore::new(store.clone()));
        let audit = Arc::new(AuditLog::new(store.clone()));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            Arc::new(InMemoryRemote::new()),
            versions.clone(),
            audit.clone(),
        ));
        (
            EvaluationService::new(store.clone(), versions, audit, engine),
            store,
        )
    }

    #[test]
    fn create_is_local_and_queued() {
        let (service, store) = service();
        let created = service.create(json!({"household": "H-1"})).unwrap();

        assert_eq!(created.sync_status, SyncStatus::Pending);
        assert_eq!(created.server_version, None);
        let queue = store.dequeue_all().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action, MutationAction::Create);
    }

    #[test]
    fn non_object_data_is_rejected() {
        let (service, store) = service();
        assert!(matches!(service.create(json!([1, 2])), Err(Error::InvalidInput(_))));
        assert!(store.dequeue_all().unwrap().is_empty());
    }

    #[test]
    fn update_bumps_local_version_and_records_changed_fields() {
        let (service, store) = service();
        let created = service.create(json!({"score": 1, "notes": "a"})).unwrap();
        let updated = service
            .update(&created.id, json!({"score": 2, "notes": "a"}))
            .unwrap();

        assert_eq!(updated.local_version, created.local_version + 1);
        assert_eq!(store.dequeue_all().unwrap().len(), 2);

        let updates = store
            .query_audit(&AuditFilter {
                action: Some(AuditAction::Update),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(updates[0].details["changedFields"], json!(["score"]));
    }

    #[test]
    fn deleting_unsynced_record_drops_it_and_its_queue() {
        let (service, store) = service();
        let created = service.create(json!({})).unwrap();

        service.delete(&created.id).unwrap();
        assert_eq!(store.get(&created.id).unwrap(), None);
        assert!(store.dequeue_all().unwrap().is_empty());
    }

    #[test]
    fn deleting_synced_record_leaves_tombstone() {
        let (service, store) = service();
        let mut synced = EntitySnapshot::new(json!({"a": 1}));
        synced.server_version = Some(3);
        synced.sync_status = SyncStatus::Synced;
        store.put(&synced).unwrap();

        service.delete(&synced.id).unwrap();
        assert!(store.get(&synced.id).unwrap().unwrap().is_deleted);
        assert_eq!(service.get(&synced.id).unwrap(), None);
        assert!(service.list().unwrap().is_empty());
        assert_eq!(store.dequeue_all().unwrap()[0].action, MutationAction::Delete);
    }

    #[test]
    fn conflicted_records_cannot_be_edited() {
        let (service, store) = service();
        let mut snapshot = EntitySnapshot::new(json!({"a": 1}));
        snapshot.sync_status = SyncStatus::Conflict;
        let remote = RemoteEntity {
            id: snapshot.id.to_string(),
            version: 2,
            data: json!({"a": 2}),
            updated_at: 5,
        };
        store
            .raise_conflict(&snapshot, &ConflictRecord::new(EVALUATION_RESOURCE, snapshot.clone(), remote))
            .unwrap();

        assert!(matches!(
            service.update(&snapshot.id, json!({"a": 3})),
            Err(Error::UnresolvedConflict(_))
        ));
        assert!(matches!(
            service.delete(&snapshot.id),
            Err(Error::UnresolvedConflict(_))
        ));
    }

    #[test]
    fn missing_record_is_not_found() {
        let (service, _store) = service();
        assert!(matches!(
            service.update(&EntityId::new(), json!({})),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn restore_queues_old_data_and_audits() {
        let (service, store) = service();
        let created = service.create(json!({"score": 1})).unwrap();
        let id = created.id.to_string();
        service
            .versions
            .save_version(EVALUATION_RESOURCE, &id, &json!({"score": 1}), "u1", None, None)
            .unwrap();
        service
            .versions
            .save_version(EVALUATION_RESOURCE, &id, &json!({"score": 2}), "u1", None, None)
            .unwrap();

        let restored = service.restore(&created.id, 1).unwrap();
        assert_eq!(restored.data, json!({"score": 1}));
        assert_eq!(service.history(&created.id).unwrap()[0].version, 3);
        assert_eq!(store.dequeue_all().unwrap().last().unwrap().action, MutationAction::Update);
        assert_eq!(
            store
                .query_audit(&AuditFilter {
                    action: Some(AuditAction::Restore),
                    ..AuditFilter::default()
                })
                .unwrap()
                .len(),
            1
        );
    }
}
