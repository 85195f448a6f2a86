//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

/// Apply `statements` in one transaction and record `version`
fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: entity snapshots, mutation queue, metadata
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                local_version INTEGER NOT NULL,
                server_version INTEGER,
                sync_status TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE INDEX IF NOT EXISTS idx_entities_status ON entities(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(updated_at DESC)",
            "CREATE TABLE IF NOT EXISTS mutation_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                payload TEXT,
                enqueued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE INDEX IF NOT EXISTS idx_queue_order ON mutation_queue(enqueued_at, seq)",
            "CREATE INDEX IF NOT EXISTS idx_queue_entity ON mutation_queue(entity_id)",
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    )
}

/// Migration to version 2: conflict records and version history
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                local_snapshot TEXT NOT NULL,
                remote_snapshot TEXT NOT NULL,
                local_timestamp INTEGER NOT NULL,
                remote_timestamp INTEGER NOT NULL,
                detected_at INTEGER NOT NULL,
                resolved_at INTEGER,
                resolution TEXT,
                resolved_by TEXT
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_open
                ON conflicts(entity_id) WHERE resolved_at IS NULL",
            "CREATE INDEX IF NOT EXISTS idx_conflicts_detected ON conflicts(detected_at)",
            "CREATE TABLE IF NOT EXISTS versions (
                id TEXT PRIMARY KEY,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                changed_by TEXT NOT NULL,
                changed_at INTEGER NOT NULL,
                change_reason TEXT,
                diff TEXT,
                UNIQUE (resource_type, resource_id, version)
            )",
            // Version rows are immutable once written
            "CREATE TRIGGER IF NOT EXISTS versions_no_update BEFORE UPDATE ON versions
             BEGIN
                 SELECT RAISE(ABORT, 'version entries are immutable');
             END",
        ],
    )
}

/// Migration to version 3: audit log
fn migrate_v3(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        3,
        &[
            "CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp INTEGER NOT NULL,
                actor_id TEXT NOT NULL,
                actor_label TEXT NOT NULL,
                action TEXT NOT NULL,
                resource TEXT NOT NULL,
                resource_id TEXT,
                client_context TEXT,
                details TEXT NOT NULL,
                success INTEGER NOT NULL,
                error_message TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_log(resource, resource_id)",
            "CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
             BEGIN
                 SELECT RAISE(ABORT, 'audit entries are append-only');
             END",
        ],
    )
}
