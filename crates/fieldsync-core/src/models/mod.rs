//! Data models for fieldsync

mod audit;
mod conflict;
mod evaluation;
mod mutation;
mod version;

pub use audit::{Actor, AuditAction, AuditEntry, AuditFilter};
pub use conflict::{ConflictId, ConflictRecord, Resolution};
pub use evaluation::{EntityId, EntitySnapshot, SyncStatus, EVALUATION_RESOURCE};
pub use mutation::{MutationAction, MutationId, PendingMutation};
pub use version::{FieldChange, FieldDiff, VersionEntry};
