//! `SQLite` implementation of `LocalStore`

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::migrations;
use super::store::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    AuditEntry, AuditFilter, ConflictId, ConflictRecord, EntityId, EntitySnapshot, MutationId,
    PendingMutation, SyncStatus, VersionEntry,
};

const ENTITY_COLUMNS: &str =
    "id, data, local_version, server_version, sync_status, updated_at, is_deleted";
const QUEUE_COLUMNS: &str = "id, entity_id, action, payload, enqueued_at, retry_count";
const CONFLICT_COLUMNS: &str = "id, entity_type, entity_id, local_snapshot, remote_snapshot, \
     local_timestamp, remote_timestamp, detected_at, resolved_at, resolution, resolved_by";
const VERSION_COLUMNS: &str =
    "id, resource_type, resource_id, version, data, changed_by, changed_at, change_reason, diff";
const AUDIT_COLUMNS: &str = "seq, id, timestamp, actor_id, actor_label, action, resource, \
     resource_id, client_context, details, success, error_message";

/// `SQLite`-backed store.
///
/// A single connection behind a mutex gives the single-writer model; WAL keeps
/// readers in other processes unblocked.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }
}

fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" instead of "wal"
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

fn to_json(value: &impl Serialize) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn conversion_error(idx: usize, error: impl Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, error.to_string().into())
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|error| conversion_error(idx, error))
}

fn parse_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|error| conversion_error(idx, error))
}

fn parse_optional_json<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(|error| conversion_error(idx, error)))
        .transpose()
}

fn parse_entity(row: &Row<'_>) -> rusqlite::Result<EntitySnapshot> {
    Ok(EntitySnapshot {
        id: parse_text(row, 0)?,
        data: parse_json(row, 1)?,
        local_version: row.get(2)?,
        server_version: row.get(3)?,
        sync_status: parse_text(row, 4)?,
        updated_at: row.get(5)?,
        is_deleted: row.get::<_, i32>(6)? != 0,
    })
}

fn parse_mutation(row: &Row<'_>) -> rusqlite::Result<PendingMutation> {
    Ok(PendingMutation {
        id: parse_text(row, 0)?,
        entity_id: parse_text(row, 1)?,
        action: parse_text(row, 2)?,
        payload: parse_optional_json(row, 3)?,
        enqueued_at: row.get(4)?,
        retry_count: row.get(5)?,
    })
}

fn parse_conflict(row: &Row<'_>) -> rusqlite::Result<ConflictRecord> {
    let resolution: Option<String> = row.get(9)?;
    Ok(ConflictRecord {
        id: parse_text(row, 0)?,
        entity_type: row.get(1)?,
        entity_id: parse_text(row, 2)?,
        local_snapshot: parse_json(row, 3)?,
        remote_snapshot: parse_json(row, 4)?,
        local_timestamp: row.get(5)?,
        remote_timestamp: row.get(6)?,
        detected_at: row.get(7)?,
        resolved_at: row.get(8)?,
        resolution: resolution
            .map(|raw| raw.parse().map_err(|error: String| conversion_error(9, error)))
            .transpose()?,
        resolved_by: row.get(10)?,
    })
}

fn parse_version(row: &Row<'_>) -> rusqlite::Result<VersionEntry> {
    Ok(VersionEntry {
        id: row.get(0)?,
        resource_type: row.get(1)?,
        resource_id: row.get(2)?,
        version: row.get(3)?,
        data: parse_json(row, 4)?,
        changed_by: row.get(5)?,
        changed_at: row.get(6)?,
        change_reason: row.get(7)?,
        diff: parse_optional_json(row, 8)?,
    })
}

fn parse_audit(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        seq: row.get(0)?,
        id: row.get(1)?,
        timestamp: row.get(2)?,
        actor_id: row.get(3)?,
        actor_label: row.get(4)?,
        action: parse_text(row, 5)?,
        resource: row.get(6)?,
        resource_id: row.get(7)?,
        client_context: row.get(8)?,
        details: parse_json(row, 9)?,
        success: row.get::<_, i32>(10)? != 0,
        error_message: row.get(11)?,
    })
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

fn write_entity(conn: &Connection, snapshot: &EntitySnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO entities (id, data, local_version, server_version, sync_status, updated_at, is_deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             data = excluded.data,
             local_version = excluded.local_version,
             server_version = excluded.server_version,
             sync_status = excluded.sync_status,
             updated_at = excluded.updated_at,
             is_deleted = excluded.is_deleted",
        params![
            snapshot.id.to_string(),
            to_json(&snapshot.data)?,
            snapshot.local_version,
            snapshot.server_version,
            snapshot.sync_status.as_str(),
            snapshot.updated_at,
            i32::from(snapshot.is_deleted)
        ],
    )?;
    Ok(())
}

fn write_mutation(conn: &Connection, mutation: &PendingMutation) -> Result<()> {
    let payload = mutation.payload.as_ref().map(to_json).transpose()?;
    conn.execute(
        "INSERT INTO mutation_queue (id, entity_id, action, payload, enqueued_at, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            mutation.id.to_string(),
            mutation.entity_id.to_string(),
            mutation.action.as_str(),
            payload,
            mutation.enqueued_at,
            mutation.retry_count
        ],
    )?;
    Ok(())
}

fn open_conflict_id(conn: &Connection, entity_id: &EntityId) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM conflicts WHERE entity_id = ? AND resolved_at IS NULL",
            params![entity_id.to_string()],
            |row| row.get(0),
        )
        .optional()?)
}

fn write_conflict(conn: &Connection, conflict: &ConflictRecord) -> Result<()> {
    if open_conflict_id(conn, &conflict.entity_id)?.is_some() {
        return Err(Error::UnresolvedConflict(conflict.entity_id.to_string()));
    }

    conn.execute(
        "INSERT INTO conflicts (id, entity_type, entity_id, local_snapshot, remote_snapshot,
             local_timestamp, remote_timestamp, detected_at, resolved_at, resolution, resolved_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            conflict.id.to_string(),
            conflict.entity_type,
            conflict.entity_id.to_string(),
            to_json(&conflict.local_snapshot)?,
            to_json(&conflict.remote_snapshot)?,
            conflict.local_timestamp,
            conflict.remote_timestamp,
            conflict.detected_at,
            conflict.resolved_at,
            conflict.resolution.map(|resolution| resolution.as_str()),
            conflict.resolved_by
        ],
    )?;
    Ok(())
}

fn rewrite_open_conflict(conn: &Connection, conflict: &ConflictRecord) -> Result<()> {
    let rows = conn.execute(
        "UPDATE conflicts SET
             local_snapshot = ?1,
             remote_snapshot = ?2,
             local_timestamp = ?3,
             remote_timestamp = ?4,
             resolved_at = ?5,
             resolution = ?6,
             resolved_by = ?7
         WHERE id = ?8 AND resolved_at IS NULL",
        params![
            to_json(&conflict.local_snapshot)?,
            to_json(&conflict.remote_snapshot)?,
            conflict.local_timestamp,
            conflict.remote_timestamp,
            conflict.resolved_at,
            conflict.resolution.map(|resolution| resolution.as_str()),
            conflict.resolved_by,
            conflict.id.to_string()
        ],
    )?;
    if rows > 0 {
        return Ok(());
    }

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conflicts WHERE id = ?)",
        params![conflict.id.to_string()],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;
    if exists {
        Err(Error::AlreadyResolved(conflict.id.to_string()))
    } else {
        Err(Error::NotFound(format!("conflict {}", conflict.id)))
    }
}

impl LocalStore for SqliteStore {
    fn put(&self, snapshot: &EntitySnapshot) -> Result<()> {
        self.with_conn(|conn| write_entity(conn, snapshot))
    }

    fn get(&self, id: &EntityId) -> Result<Option<EntitySnapshot>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"),
                    params![id.to_string()],
                    parse_entity,
                )
                .optional()?)
        })
    }

    fn get_all(&self) -> Result<Vec<EntitySnapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTITY_COLUMNS} FROM entities ORDER BY updated_at DESC, id"
            ))?;
            let entities = stmt
                .query_map([], parse_entity)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entities)
        })
    }

    fn get_by_status(&self, status: SyncStatus) -> Result<Vec<EntitySnapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTITY_COLUMNS} FROM entities WHERE sync_status = ?
                 ORDER BY updated_at DESC, id"
            ))?;
            let entities = stmt
                .query_map(params![status.as_str()], parse_entity)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entities)
        })
    }

    fn delete(&self, id: &EntityId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM entities WHERE id = ?", params![id.to_string()])?;
            Ok(())
        })
    }

    fn put_with_mutation(
        &self,
        snapshot: &EntitySnapshot,
        mutation: &PendingMutation,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_entity(&tx, snapshot)?;
            write_mutation(&tx, mutation)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn enqueue(&self, mutation: &PendingMutation) -> Result<()> {
        self.with_conn(|conn| write_mutation(conn, mutation))
    }

    fn dequeue_all(&self) -> Result<Vec<PendingMutation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {QUEUE_COLUMNS} FROM mutation_queue ORDER BY enqueued_at, seq"
            ))?;
            let queue = stmt
                .query_map([], parse_mutation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(queue)
        })
    }

    fn remove_from_queue(&self, id: &MutationId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM mutation_queue WHERE id = ?", params![id.to_string()])?;
            Ok(())
        })
    }

    fn update_queue_item(&self, mutation: &PendingMutation) -> Result<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE mutation_queue SET retry_count = ? WHERE id = ?",
                params![mutation.retry_count, mutation.id.to_string()],
            )?;
            if rows == 0 {
                return Err(Error::NotFound(format!("queue item {}", mutation.id)));
            }
            Ok(())
        })
    }

    fn mark_synced(&self, snapshot: &EntitySnapshot, mutation_id: &MutationId) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_entity(&tx, snapshot)?;
            tx.execute(
                "DELETE FROM mutation_queue WHERE id = ?",
                params![mutation_id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn raise_conflict(&self, snapshot: &EntitySnapshot, conflict: &ConflictRecord) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_conflict(&tx, conflict)?;
            write_entity(&tx, snapshot)?;
            tx.execute(
                "DELETE FROM mutation_queue WHERE entity_id = ?",
                params![snapshot.id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn discard(&self, id: &EntityId) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entities WHERE id = ?", params![id.to_string()])?;
            tx.execute(
                "DELETE FROM mutation_queue WHERE entity_id = ?",
                params![id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM meta WHERE key = ?", params![key])?;
            Ok(())
        })
    }

    fn clear_all(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM mutation_queue", [])?;
            tx.execute("DELETE FROM entities", [])?;
            tx.commit()?;
            Ok(())
        })
    }

    fn insert_conflict(&self, conflict: &ConflictRecord) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_conflict(&tx, conflict)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn get_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?"),
                    params![id.to_string()],
                    parse_conflict,
                )
                .optional()?)
        })
    }

    fn list_unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE resolved_at IS NULL
                 ORDER BY detected_at, id"
            ))?;
            let conflicts = stmt
                .query_map([], parse_conflict)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(conflicts)
        })
    }

    fn unresolved_conflict_for(&self, entity_id: &EntityId) -> Result<Option<ConflictRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {CONFLICT_COLUMNS} FROM conflicts
                         WHERE entity_id = ? AND resolved_at IS NULL"
                    ),
                    params![entity_id.to_string()],
                    parse_conflict,
                )
                .optional()?)
        })
    }

    fn update_conflict(&self, conflict: &ConflictRecord) -> Result<()> {
        self.with_conn(|conn| rewrite_open_conflict(conn, conflict))
    }

    fn settle_conflict(
        &self,
        conflict: &ConflictRecord,
        snapshot: Option<&EntitySnapshot>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            rewrite_open_conflict(&tx, conflict)?;
            match snapshot {
                Some(snapshot) => write_entity(&tx, snapshot)?,
                None => {
                    tx.execute(
                        "DELETE FROM entities WHERE id = ?",
                        params![conflict.entity_id.to_string()],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn append_version(&self, entry: &VersionEntry) -> Result<()> {
        self.with_conn(|conn| {
            let diff = entry.diff.as_ref().map(to_json).transpose()?;
            let inserted = conn.execute(
                "INSERT INTO versions (id, resource_type, resource_id, version, data, changed_by,
                     changed_at, change_reason, diff)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.id,
                    entry.resource_type,
                    entry.resource_id,
                    entry.version,
                    to_json(&entry.data)?,
                    entry.changed_by,
                    entry.changed_at,
                    entry.change_reason,
                    diff
                ],
            );

            match inserted {
                Ok(_) => Ok(()),
                Err(error) if is_constraint_violation(&error) => Err(Error::InvalidInput(format!(
                    "version {} of {}/{} already exists",
                    entry.version, entry.resource_type, entry.resource_id
                ))),
                Err(error) => Err(error.into()),
            }
        })
    }

    fn list_versions(&self, resource_type: &str, resource_id: &str) -> Result<Vec<VersionEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM versions
                 WHERE resource_type = ? AND resource_id = ?
                 ORDER BY version DESC"
            ))?;
            let versions = stmt
                .query_map(params![resource_type, resource_id], parse_version)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(versions)
        })
    }

    fn get_version(
        &self,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> Result<Option<VersionEntry>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {VERSION_COLUMNS} FROM versions
                         WHERE resource_type = ? AND resource_id = ? AND version = ?"
                    ),
                    params![resource_type, resource_id, version],
                    parse_version,
                )
                .optional()?)
        })
    }

    fn latest_version(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<VersionEntry>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {VERSION_COLUMNS} FROM versions
                         WHERE resource_type = ? AND resource_id = ?
                         ORDER BY version DESC LIMIT 1"
                    ),
                    params![resource_type, resource_id],
                    parse_version,
                )
                .optional()?)
        })
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log (id, timestamp, actor_id, actor_label, action, resource,
                     resource_id, client_context, details, success, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.id,
                    entry.timestamp,
                    entry.actor_id,
                    entry.actor_label,
                    entry.action.as_str(),
                    entry.resource,
                    entry.resource_id,
                    entry.client_context,
                    to_json(&entry.details)?,
                    i32::from(entry.success),
                    entry.error_message
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(actor_id) = &filter.actor_id {
            clauses.push("actor_id = ?");
            values.push(Value::from(actor_id.clone()));
        }
        if let Some(action) = filter.action {
            clauses.push("action = ?");
            values.push(Value::from(action.as_str().to_string()));
        }
        if let Some(resource) = &filter.resource {
            clauses.push("resource = ?");
            values.push(Value::from(resource.clone()));
        }
        if let Some(resource_id) = &filter.resource_id {
            clauses.push("resource_id = ?");
            values.push(Value::from(resource_id.clone()));
        }
        if let Some(from) = filter.from {
            clauses.push("timestamp >= ?");
            values.push(Value::from(from));
        }
        if let Some(to) = filter.to {
            clauses.push("timestamp <= ?");
            values.push(Value::from(to));
        }
        if let Some(success) = filter.success {
            clauses.push("success = ?");
            values.push(Value::from(i64::from(success)));
        }

        let mut sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, seq DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::from(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(params_from_iter(values.iter()), parse_audit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    fn audit_since(&self, after_seq: i64, limit: usize) -> Result<Vec<AuditEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE seq > ? ORDER BY seq LIMIT ?"
            ))?;
            let entries = stmt
                .query_map(
                    params![after_seq, i64::try_from(limit).unwrap_or(i64::MAX)],
                    parse_audit,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    fn prune_audit(&self, before: i64) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM audit_log WHERE timestamp < ?", params![before])?)
        })
    }
}
