//! Application-facing services built on the store and sync engine.

mod app;
mod evaluations;
mod session;
mod storage;

pub use app::FieldSync;
pub use evaluations::EvaluationService;
pub use session::{LogoutSummary, SessionService};
pub use storage::{StorageMode, StorageService};
