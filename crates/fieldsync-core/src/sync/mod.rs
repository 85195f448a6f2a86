//! Replication between the local store and the remote authority.

mod conflicts;
mod engine;
mod status;

pub use engine::{SyncEngine, SyncOutcome, SyncReport, SyncTrigger};
pub use status::{EngineStatus, StatusPublisher, Subscription, SyncProgress, SyncState};
