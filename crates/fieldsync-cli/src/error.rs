use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No evaluation data provided")]
    EmptyData,
    #[error("Evaluation data must be a JSON object: {0}")]
    InvalidData(String),
    #[error("Evaluation ID cannot be empty")]
    EmptyId,
    #[error("Evaluation not found for id/prefix: {0}")]
    EvaluationNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Invalid conflict id: {0}")]
    InvalidConflictId(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
    #[error("Not signed in. Run `fieldsync login` first.")]
    NotSignedIn,
    #[error(
        "Sync is not configured. Set FIELDSYNC_API_URL (and optionally FIELDSYNC_DEVICE_ID) to enable it."
    )]
    SyncNotConfigured,
    #[error("Refusing to sign out with {0} unsynced changes; pass --force to discard them")]
    UnsyncedChanges(usize),
}
