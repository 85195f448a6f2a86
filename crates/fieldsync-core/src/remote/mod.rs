//! Remote authority client.
//!
//! `RemoteApi` is the network boundary the sync engine talks to. Calls never
//! touch local storage; they only return typed outcomes.

mod http;
mod local_only;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::AuditEntry;

pub use http::HttpRemoteClient;
pub use local_only::LocalOnlyRemote;

/// Authoritative snapshot as returned by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntity {
    pub id: String,
    pub version: i64,
    pub data: serde_json::Value,
    /// Unix ms
    pub updated_at: i64,
}

/// Typed failure of a remote call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote request failed: {0}")]
    Network(String),
    #[error("Remote request timed out")]
    Timeout,
    #[error("Remote server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Remote rejected request ({status}): {message}")]
    Validation { status: u16, message: String },
    #[error("Remote rejected credentials")]
    Unauthorized,
    /// Version precondition failed; carries the current server snapshot
    #[error("Version conflict: server is at version {}", .0.version)]
    Conflict(RemoteEntity),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Transport failures, timeouts and 5xx may succeed on a later attempt.
    /// Conflicts are never retried without resolution.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Server { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations offered by the remote authority
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Entities changed at or after `since` (Unix ms); everything when `None`
    async fn fetch_changed_since(
        &self,
        token: &str,
        since: Option<i64>,
    ) -> RemoteResult<Vec<RemoteEntity>>;

    /// Create an entity with a client-generated id
    async fn create(
        &self,
        token: &str,
        id: &str,
        data: &serde_json::Value,
    ) -> RemoteResult<RemoteEntity>;

    /// Replace an entity's data if the server is still at `expected_version`
    async fn update(
        &self,
        token: &str,
        id: &str,
        data: &serde_json::Value,
        expected_version: i64,
    ) -> RemoteResult<RemoteEntity>;

    async fn delete(&self, token: &str, id: &str) -> RemoteResult<()>;

    /// Upload audit entries; returns the ids the server accepted
    async fn push_audit_batch(&self, token: &str, entries: &[AuditEntry])
        -> RemoteResult<Vec<String>>;

    async fn health_check(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_never_retryable() {
        let conflict = RemoteError::Conflict(RemoteEntity {
            id: "e".into(),
            version: 2,
            data: serde_json::Value::Null,
            updated_at: 0,
        });
        assert!(!conflict.is_retryable());
        assert!(!RemoteError::Unauthorized.is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Server {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
    }

    #[test]
    fn remote_entity_uses_camel_case_on_the_wire() {
        let entity: RemoteEntity = serde_json::from_str(
            r#"{"id":"x","version":3,"data":{"a":1},"updatedAt":99}"#,
        )
        .unwrap();
        assert_eq!(entity.version, 3);
        assert_eq!(entity.updated_at, 99);
    }
}
