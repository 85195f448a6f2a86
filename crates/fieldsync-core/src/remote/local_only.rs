//! Stand-in remote for devices without a configured API.

use async_trait::async_trait;

use super::{RemoteApi, RemoteEntity, RemoteError, RemoteResult};
use crate::models::AuditEntry;

/// Every call fails as a network error; health checks report unreachable
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnlyRemote;

fn not_configured<T>() -> RemoteResult<T> {
    Err(RemoteError::Network(
        "no remote authority configured".to_string(),
    ))
}

#[async_trait]
impl RemoteApi for LocalOnlyRemote {
    async fn fetch_changed_since(
        &self,
        _token: &str,
        _since: Option<i64>,
    ) -> RemoteResult<Vec<RemoteEntity>> {
        not_configured()
    }

    async fn create(
        &self,
        _token: &str,
        _id: &str,
        _data: &serde_json::Value,
    ) -> RemoteResult<RemoteEntity> {
        not_configured()
    }

    async fn update(
        &self,
        _token: &str,
        _id: &str,
        _data: &serde_json::Value,
        _expected_version: i64,
    ) -> RemoteResult<RemoteEntity> {
        not_configured()
    }

    async fn delete(&self, _token: &str, _id: &str) -> RemoteResult<()> {
        not_configured()
    }

    async fn push_audit_batch(
        &self,
        _token: &str,
        _entries: &[AuditEntry],
    ) -> RemoteResult<Vec<String>> {
        not_configured()
    }

    async fn health_check(&self) -> bool {
        false
    }
}
