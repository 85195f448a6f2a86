//! In-memory implementation of `LocalStore`.
//!
//! Same semantics as `SqliteStore` without persistence. Used when device
//! storage cannot be opened and in tests, where `set_available(false)`
//! simulates a storage outage.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::store::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    AuditEntry, AuditFilter, ConflictId, ConflictRecord, EntityId, EntitySnapshot, MutationId,
    PendingMutation, SyncStatus, VersionEntry,
};

#[derive(Default)]
struct Inner {
    entities: BTreeMap<EntityId, EntitySnapshot>,
    /// Insertion order; `dequeue_all` sorts stably by `enqueued_at`
    queue: Vec<PendingMutation>,
    meta: HashMap<String, String>,
    conflicts: Vec<ConflictRecord>,
    versions: Vec<VersionEntry>,
    audit: Vec<AuditEntry>,
    next_audit_seq: i64,
}

impl Inner {
    fn open_conflict_for(&self, entity_id: &EntityId) -> Option<&ConflictRecord> {
        self.conflicts
            .iter()
            .find(|conflict| conflict.entity_id == *entity_id && !conflict.is_resolved())
    }

    fn insert_conflict(&mut self, conflict: &ConflictRecord) -> Result<()> {
        if self.open_conflict_for(&conflict.entity_id).is_some() {
            return Err(Error::UnresolvedConflict(conflict.entity_id.to_string()));
        }
        self.conflicts.push(conflict.clone());
        Ok(())
    }

    fn sorted_entities(&self, status: Option<SyncStatus>) -> Vec<EntitySnapshot> {
        let mut entities: Vec<EntitySnapshot> = self
            .entities
            .values()
            .filter(|entity| status.map_or(true, |status| entity.sync_status == status))
            .cloned()
            .collect();
        entities.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        entities
    }
}

/// Volatile store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a simulated storage outage; while unavailable every call fails
    /// with `StorageUnavailable`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::StorageUnavailable("simulated storage outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.check()?;
        Ok(self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.check()?;
        Ok(self.inner.write().unwrap_or_else(PoisonError::into_inner))
    }
}

fn open_conflict_mut<'a>(
    inner: &'a mut Inner,
    conflict: &ConflictRecord,
) -> Result<&'a mut ConflictRecord> {
    let stored = inner
        .conflicts
        .iter_mut()
        .find(|stored| stored.id == conflict.id)
        .ok_or_else(|| Error::NotFound(format!("conflict {}", conflict.id)))?;
    if stored.is_resolved() {
        return Err(Error::AlreadyResolved(conflict.id.to_string()));
    }
    Ok(stored)
}

impl LocalStore for MemoryStore {
    fn put(&self, snapshot: &EntitySnapshot) -> Result<()> {
        self.write()?.entities.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Option<EntitySnapshot>> {
        Ok(self.read()?.entities.get(id).cloned())
    }

    fn get_all(&self) -> Result<Vec<EntitySnapshot>> {
        Ok(self.read()?.sorted_entities(None))
    }

    fn get_by_status(&self, status: SyncStatus) -> Result<Vec<EntitySnapshot>> {
        Ok(self.read()?.sorted_entities(Some(status)))
    }

    fn delete(&self, id: &EntityId) -> Result<()> {
        self.write()?.entities.remove(id);
        Ok(())
    }

    fn put_with_mutation(
        &self,
        snapshot: &EntitySnapshot,
        mutation: &PendingMutation,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if inner.queue.iter().any(|queued| queued.id == mutation.id) {
            return Err(Error::InvalidInput(format!(
                "queue item {} already exists",
                mutation.id
            )));
        }
        inner.entities.insert(snapshot.id, snapshot.clone());
        inner.queue.push(mutation.clone());
        Ok(())
    }

    fn enqueue(&self, mutation: &PendingMutation) -> Result<()> {
        let mut inner = self.write()?;
        if inner.queue.iter().any(|queued| queued.id == mutation.id) {
            return Err(Error::InvalidInput(format!(
                "queue item {} already exists",
                mutation.id
            )));
        }
        inner.queue.push(mutation.clone());
        Ok(())
    }

    fn dequeue_all(&self) -> Result<Vec<PendingMutation>> {
        let mut queue = self.read()?.queue.clone();
        queue.sort_by_key(|mutation| mutation.enqueued_at);
        Ok(queue)
    }

    fn remove_from_queue(&self, id: &MutationId) -> Result<()> {
        self.write()?.queue.retain(|mutation| mutation.id != *id);
        Ok(())
    }

    fn update_queue_item(&self, mutation: &PendingMutation) -> Result<()> {
        let mut inner = self.write()?;
        let queued = inner
            .queue
            .iter_mut()
            .find(|queued| queued.id == mutation.id)
            .ok_or_else(|| Error::NotFound(format!("queue item {}", mutation.id)))?;
        queued.retry_count = mutation.retry_count;
        Ok(())
    }

    fn mark_synced(&self, snapshot: &EntitySnapshot, mutation_id: &MutationId) -> Result<()> {
        let mut inner = self.write()?;
        inner.entities.insert(snapshot.id, snapshot.clone());
        inner.queue.retain(|mutation| mutation.id != *mutation_id);
        Ok(())
    }

    fn raise_conflict(&self, snapshot: &EntitySnapshot, conflict: &ConflictRecord) -> Result<()> {
        let mut inner = self.write()?;
        inner.insert_conflict(conflict)?;
        inner.entities.insert(snapshot.id, snapshot.clone());
        inner.queue.retain(|mutation| mutation.entity_id != snapshot.id);
        Ok(())
    }

    fn discard(&self, id: &EntityId) -> Result<()> {
        let mut inner = self.write()?;
        inner.entities.remove(id);
        inner.queue.retain(|mutation| mutation.entity_id != *id);
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.write()?.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        self.write()?.meta.remove(key);
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.entities.clear();
        inner.queue.clear();
        Ok(())
    }

    fn insert_conflict(&self, conflict: &ConflictRecord) -> Result<()> {
        self.write()?.insert_conflict(conflict)
    }

    fn get_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        Ok(self
            .read()?
            .conflicts
            .iter()
            .find(|conflict| conflict.id == *id)
            .cloned())
    }

    fn list_unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let mut open: Vec<ConflictRecord> = self
            .read()?
            .conflicts
            .iter()
            .filter(|conflict| !conflict.is_resolved())
            .cloned()
            .collect();
        open.sort_by_key(|conflict| conflict.detected_at);
        Ok(open)
    }

    fn unresolved_conflict_for(&self, entity_id: &EntityId) -> Result<Option<ConflictRecord>> {
        Ok(self.read()?.open_conflict_for(entity_id).cloned())
    }

    fn update_conflict(&self, conflict: &ConflictRecord) -> Result<()> {
        let mut inner = self.write()?;
        *open_conflict_mut(&mut inner, conflict)? = conflict.clone();
        Ok(())
    }

    fn settle_conflict(
        &self,
        conflict: &ConflictRecord,
        snapshot: Option<&EntitySnapshot>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        *open_conflict_mut(&mut inner, conflict)? = conflict.clone();
        match snapshot {
            Some(snapshot) => {
                inner.entities.insert(snapshot.id, snapshot.clone());
            }
            None => {
                inner.entities.remove(&conflict.entity_id);
            }
        }
        Ok(())
    }

    fn append_version(&self, entry: &VersionEntry) -> Result<()> {
        let mut inner = self.write()?;
        let duplicate = inner.versions.iter().any(|existing| {
            existing.id == entry.id
                || (existing.resource_type == entry.resource_type
                    && existing.resource_id == entry.resource_id
                    && existing.version == entry.version)
        });
        if duplicate {
            return Err(Error::InvalidInput(format!(
                "version {} of {}/{} already exists",
                entry.version, entry.resource_type, entry.resource_id
            )));
        }
        inner.versions.push(entry.clone());
        Ok(())
    }

    fn list_versions(&self, resource_type: &str, resource_id: &str) -> Result<Vec<VersionEntry>> {
        let mut versions: Vec<VersionEntry> = self
            .read()?
            .versions
            .iter()
            .filter(|entry| entry.resource_type == resource_type && entry.resource_id == resource_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    fn get_version(
        &self,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> Result<Option<VersionEntry>> {
        Ok(self
            .read()?
            .versions
            .iter()
            .find(|entry| {
                entry.resource_type == resource_type
                    && entry.resource_id == resource_id
                    && entry.version == version
            })
            .cloned())
    }

    fn latest_version(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<VersionEntry>> {
        Ok(self
            .read()?
            .versions
            .iter()
            .filter(|entry| entry.resource_type == resource_type && entry.resource_id == resource_id)
            .max_by_key(|entry| entry.version)
            .cloned())
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<i64> {
        let mut inner = self.write()?;
        if inner.audit.iter().any(|existing| existing.id == entry.id) {
            return Err(Error::InvalidInput(format!(
                "audit entry {} already exists",
                entry.id
            )));
        }
        inner.next_audit_seq += 1;
        let seq = inner.next_audit_seq;
        let mut stored = entry.clone();
        stored.seq = seq;
        inner.audit.push(stored);
        Ok(seq)
    }

    fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .read()?
            .audit
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.seq.cmp(&a.seq)));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn audit_since(&self, after_seq: i64, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|entry| entry.seq > after_seq)
            .take(limit)
            .cloned()
            .collect())
    }

    fn prune_audit(&self, before: i64) -> Result<usize> {
        let mut inner = self.write()?;
        let count = inner.audit.len();
        inner.audit.retain(|entry| entry.timestamp >= before);
        Ok(count - inner.audit.len())
    }
}
