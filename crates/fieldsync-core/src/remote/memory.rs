//! In-process remote authority.
//!
//! Implements the same version-precondition semantics as the HTTP API, with
//! hooks to script transient failures and edits made by other actors.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{RemoteApi, RemoteEntity, RemoteError, RemoteResult};
use crate::models::AuditEntry;
use crate::util::now_ms;

/// One call received by [`InMemoryRemote`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub operation: &'static str,
    pub entity_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    entities: BTreeMap<String, RemoteEntity>,
    scripted_failures: VecDeque<RemoteError>,
    unreachable: bool,
    required_token: Option<String>,
    audit: Vec<AuditEntry>,
    calls: Vec<RemoteCall>,
    clock: i64,
}

impl Inner {
    /// Strictly increasing timestamps so `since` filtering is deterministic
    fn tick(&mut self) -> i64 {
        self.clock = now_ms().max(self.clock + 1);
        self.clock
    }
}

/// Remote authority kept in memory
#[derive(Default)]
pub struct InMemoryRemote {
    inner: Mutex<Inner>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call whose bearer token differs from `token`
    #[must_use]
    pub fn with_required_token(self, token: impl Into<String>) -> Self {
        self.lock().required_token = Some(token.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an entity as if it had been created elsewhere
    pub fn insert(&self, id: impl Into<String>, version: i64, data: serde_json::Value) -> RemoteEntity {
        let mut inner = self.lock();
        let id = id.into();
        let entity = RemoteEntity {
            updated_at: inner.tick(),
            id: id.clone(),
            version,
            data,
        };
        inner.entities.insert(id, entity.clone());
        entity
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<RemoteEntity> {
        self.lock().entities.get(id).cloned()
    }

    /// Apply a write from another actor, bumping the server version
    pub fn edit_as_other_actor(&self, id: &str, data: serde_json::Value) -> Option<RemoteEntity> {
        let mut inner = self.lock();
        let updated_at = inner.tick();
        let entity = inner.entities.get_mut(id)?;
        entity.version += 1;
        entity.data = data;
        entity.updated_at = updated_at;
        Some(entity.clone())
    }

    /// Make the next call fail with `error` (queued, one per call)
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Make the next `count` calls fail with `error`
    pub fn fail_next_n(&self, error: &RemoteError, count: usize) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.scripted_failures.push_back(error.clone());
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    #[must_use]
    pub fn received_audit(&self) -> Vec<AuditEntry> {
        self.lock().audit.clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }

    /// Record the call and apply reachability, auth and scripted failures
    fn begin(
        &self,
        operation: &'static str,
        token: &str,
        entity_id: Option<&str>,
    ) -> RemoteResult<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall {
            operation,
            entity_id: entity_id.map(str::to_string),
        });

        if inner.unreachable {
            return Err(RemoteError::Network("remote authority unreachable".to_string()));
        }
        if let Some(error) = inner.scripted_failures.pop_front() {
            return Err(error);
        }
        if inner
            .required_token
            .as_deref()
            .is_some_and(|required| required != token)
        {
            return Err(RemoteError::Unauthorized);
        }
        Ok(inner)
    }
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    async fn fetch_changed_since(
        &self,
        token: &str,
        since: Option<i64>,
    ) -> RemoteResult<Vec<RemoteEntity>> {
        let inner = self.begin("fetch_changed_since", token, None)?;
        let mut changed: Vec<RemoteEntity> = inner
            .entities
            .values()
            .filter(|entity| since.map_or(true, |since| entity.updated_at >= since))
            .cloned()
            .collect();
        changed.sort_by_key(|entity| entity.updated_at);
        Ok(changed)
    }

    async fn create(
        &self,
        token: &str,
        id: &str,
        data: &serde_json::Value,
    ) -> RemoteResult<RemoteEntity> {
        let mut inner = self.begin("create", token, Some(id))?;
        if let Some(existing) = inner.entities.get(id) {
            return Err(RemoteError::Conflict(existing.clone()));
        }
        let entity = RemoteEntity {
            id: id.to_string(),
            version: 1,
            data: data.clone(),
            updated_at: inner.tick(),
        };
        inner.entities.insert(id.to_string(), entity.clone());
        Ok(entity)
    }

    async fn update(
        &self,
        token: &str,
        id: &str,
        data: &serde_json::Value,
        expected_version: i64,
    ) -> RemoteResult<RemoteEntity> {
        let mut inner = self.begin("update", token, Some(id))?;
        let updated_at = inner.tick();
        let Some(entity) = inner.entities.get_mut(id) else {
            return Err(RemoteError::Validation {
                status: 404,
                message: format!("evaluation {id} not found"),
            });
        };
        if entity.version != expected_version {
            return Err(RemoteError::Conflict(entity.clone()));
        }
        entity.version += 1;
        entity.data = data.clone();
        entity.updated_at = updated_at;
        Ok(entity.clone())
    }

    async fn delete(&self, token: &str, id: &str) -> RemoteResult<()> {
        let mut inner = self.begin("delete", token, Some(id))?;
        inner.entities.remove(id);
        Ok(())
    }

    async fn push_audit_batch(
        &self,
        token: &str,
        entries: &[AuditEntry],
    ) -> RemoteResult<Vec<String>> {
        let mut inner = self.begin("push_audit_batch", token, None)?;
        inner.audit.extend_from_slice(entries);
        Ok(entries.iter().map(|entry| entry.id.clone()).collect())
    }

    async fn health_check(&self) -> bool {
        !self.lock().unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn update_requires_matching_version() {
        let remote = InMemoryRemote::new();
        remote.insert("e1", 3, json!({"score": 1}));

        let updated = remote.update("t", "e1", &json!({"score": 2}), 3).await.unwrap();
        assert_eq!(updated.version, 4);

        match remote.update("t", "e1", &json!({"score": 3}), 3).await {
            Err(RemoteError::Conflict(server)) => {
                assert_eq!(server.version, 4);
                assert_eq!(server.data, json!({"score": 2}));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scripted_failures_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        remote.fail_next(RemoteError::Timeout);

        assert_eq!(
            remote.create("t", "e1", &json!({})).await.unwrap_err(),
            RemoteError::Timeout
        );
        assert_eq!(remote.create("t", "e1", &json!({})).await.unwrap().version, 1);
        assert_eq!(remote.calls().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_returns_changes_at_or_after_cursor() {
        let remote = InMemoryRemote::new();
        remote.insert("a", 1, json!({}));
        let cursor = remote.insert("b", 1, json!({})).updated_at;

        let changed = remote.fetch_changed_since("t", Some(cursor)).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, "b");
        assert_eq!(remote.fetch_changed_since("t", None).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wrong_token_is_unauthorized() {
        let remote = InMemoryRemote::new().with_required_token("secret");
        assert_eq!(
            remote.delete("nope", "e1").await.unwrap_err(),
            RemoteError::Unauthorized
        );
        assert!(remote.delete("secret", "e1").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_remote_fails_health_check() {
        let remote = InMemoryRemote::new();
        assert!(remote.health_check().await);
        remote.set_reachable(false);
        assert!(!remote.health_check().await);
        assert!(matches!(
            remote.fetch_changed_since("t", None).await,
            Err(RemoteError::Network(_))
        ));
    }
}
