//! Error types for fieldsync-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local persistence could not be opened or is currently unreachable
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport failure or timeout talking to the remote authority
    #[error("Network error: {0}")]
    Network(String),

    /// Remote authority answered with a 5xx
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Remote authority rejected the request (4xx other than a conflict)
    #[error("Validation error ({status}): {message}")]
    Validation { status: u16, message: String },

    /// Version precondition failed on the remote authority
    #[error("Version conflict on {entity_id}: server is at version {server_version}")]
    Conflict {
        entity_id: String,
        server_version: i64,
    },

    /// No access token is available for remote calls
    #[error("Not authenticated with the remote authority")]
    Unauthenticated,

    /// Connectivity signal reports the device is offline
    #[error("Device is offline")]
    Offline,

    /// Conflict record was already resolved
    #[error("Conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// Entity, conflict, or version not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity has an open conflict that must be resolved first
    #[error("Entity {0} has an unresolved conflict")]
    UnresolvedConflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::StorageUnavailable(_)
        )
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Network(message) => Self::Network(message),
            RemoteError::Timeout => Self::Network("request timed out".to_string()),
            RemoteError::Server { status, message } => Self::Server { status, message },
            RemoteError::Validation { status, message } => Self::Validation { status, message },
            RemoteError::Unauthorized => Self::Unauthenticated,
            RemoteError::Conflict(server) => Self::Conflict {
                entity_id: server.id,
                server_version: server.version,
            },
            RemoteError::InvalidPayload(message) => Self::Validation {
                status: 0,
                message: format!("invalid payload from remote authority: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteEntity;

    #[test]
    fn remote_conflict_maps_to_typed_conflict() {
        let remote = RemoteEntity {
            id: "abc".to_string(),
            version: 4,
            data: serde_json::json!({"status": "open"}),
            updated_at: 10,
        };

        match Error::from(RemoteError::Conflict(remote)) {
            Error::Conflict {
                entity_id,
                server_version,
            } => {
                assert_eq!(entity_id, "abc");
                assert_eq!(server_version, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::Server {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!Error::Validation {
            status: 422,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!Error::AlreadyResolved("c1".into()).is_retryable());
    }
}
