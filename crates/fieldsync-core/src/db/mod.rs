//! Durable local store

mod memory;
mod migrations;
mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use sqlite::SqliteStore;
pub use store::LocalStore;

/// Metadata key for the pull cursor (Unix ms of the last successful pull)
pub const META_LAST_PULL_AT: &str = "last_pull_at";
/// Metadata key for the last audit `seq` accepted by the remote authority
pub const META_AUDIT_CURSOR: &str = "audit_cursor";
/// Metadata key for the last completed sync cycle (Unix ms)
pub const META_LAST_SYNC_AT: &str = "last_sync_at";
/// Metadata key for the persisted device identifier
pub const META_DEVICE_ID: &str = "device_id";
