//! Durable local store contract

use crate::error::Result;
use crate::models::{
    AuditEntry, AuditFilter, ConflictId, ConflictRecord, EntityId, EntitySnapshot, MutationId,
    PendingMutation, SyncStatus, VersionEntry,
};

/// Crash-safe local persistence for snapshots, the mutation queue, metadata,
/// conflicts, version history and the audit log.
///
/// Every method is atomic on its own. Methods that touch several records
/// (`put_with_mutation`, `mark_synced`, `raise_conflict`, `settle_conflict`,
/// `discard`) run in a single transaction.
pub trait LocalStore: Send + Sync {
    /// Insert or replace a snapshot
    fn put(&self, snapshot: &EntitySnapshot) -> Result<()>;

    fn get(&self, id: &EntityId) -> Result<Option<EntitySnapshot>>;

    /// All snapshots, most recently updated first
    fn get_all(&self) -> Result<Vec<EntitySnapshot>>;

    fn get_by_status(&self, status: SyncStatus) -> Result<Vec<EntitySnapshot>>;

    /// Remove a snapshot; missing ids are not an error
    fn delete(&self, id: &EntityId) -> Result<()>;

    /// Write a snapshot and enqueue the mutation that describes it
    fn put_with_mutation(&self, snapshot: &EntitySnapshot, mutation: &PendingMutation)
        -> Result<()>;

    fn enqueue(&self, mutation: &PendingMutation) -> Result<()>;

    /// Every queued mutation in enqueue order
    fn dequeue_all(&self) -> Result<Vec<PendingMutation>>;

    fn remove_from_queue(&self, id: &MutationId) -> Result<()>;

    /// Persist a changed `retry_count`
    fn update_queue_item(&self, mutation: &PendingMutation) -> Result<()>;

    /// Store the server-confirmed snapshot and drop the confirmed queue item
    fn mark_synced(&self, snapshot: &EntitySnapshot, mutation_id: &MutationId) -> Result<()>;

    /// Store the conflicted snapshot, insert the record and drop every queued
    /// mutation of the entity. Fails with `UnresolvedConflict` when the entity
    /// already has an open record.
    fn raise_conflict(&self, snapshot: &EntitySnapshot, conflict: &ConflictRecord) -> Result<()>;

    /// Remove a snapshot together with its queued mutations
    fn discard(&self, id: &EntityId) -> Result<()>;

    fn get_meta(&self, key: &str) -> Result<Option<String>>;

    fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    fn delete_meta(&self, key: &str) -> Result<()>;

    /// Drop every snapshot and queued mutation. Conflicts, versions, audit
    /// entries and metadata are kept.
    fn clear_all(&self) -> Result<()>;

    fn insert_conflict(&self, conflict: &ConflictRecord) -> Result<()>;

    fn get_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>>;

    /// Open conflicts, oldest first
    fn list_unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>>;

    fn unresolved_conflict_for(&self, entity_id: &EntityId) -> Result<Option<ConflictRecord>>;

    /// Rewrite an open conflict. Fails with `AlreadyResolved` if it was
    /// resolved meanwhile and `NotFound` if it does not exist.
    fn update_conflict(&self, conflict: &ConflictRecord) -> Result<()>;

    /// Mark an open conflict resolved and write the winning snapshot, or
    /// remove the entity when `snapshot` is `None`. Same errors as
    /// `update_conflict`.
    fn settle_conflict(
        &self,
        conflict: &ConflictRecord,
        snapshot: Option<&EntitySnapshot>,
    ) -> Result<()>;

    /// Append an immutable version entry; duplicates are rejected
    fn append_version(&self, entry: &VersionEntry) -> Result<()>;

    /// History of one resource, highest version first
    fn list_versions(&self, resource_type: &str, resource_id: &str) -> Result<Vec<VersionEntry>>;

    fn get_version(
        &self,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> Result<Option<VersionEntry>>;

    fn latest_version(&self, resource_type: &str, resource_id: &str)
        -> Result<Option<VersionEntry>>;

    /// Append an audit entry and return its sequence number
    fn append_audit(&self, entry: &AuditEntry) -> Result<i64>;

    /// Matching entries, newest first, honouring `filter.limit`
    fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;

    /// Entries with `seq > after_seq` in sequence order
    fn audit_since(&self, after_seq: i64, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Delete entries older than `before` (Unix ms); returns how many
    fn prune_audit(&self, before: i64) -> Result<usize>;
}
