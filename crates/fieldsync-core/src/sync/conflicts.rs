//! Human resolution of conflict records.
//!
//! Resolution keeps one whole snapshot. Keeping the local side pushes it
//! against the version the conflict recorded; if the server moved again in
//! the meantime the record is refreshed and stays open.

use serde_json::{json, Value};

use super::engine::SyncEngine;
use crate::error::{Error, Result};
use crate::models::{
    AuditAction, AuditEntry, ConflictId, ConflictRecord, EntitySnapshot, FieldDiff, Resolution,
    SyncStatus,
};
use crate::remote::RemoteError;
use crate::util::now_ms;
use crate::versions::diff;

impl SyncEngine {
    /// Open conflicts, oldest first
    pub fn list_unresolved(&self) -> Result<Vec<ConflictRecord>> {
        self.store.list_unresolved_conflicts()
    }

    pub fn get_conflict(&self, conflict_id: &ConflictId) -> Result<ConflictRecord> {
        self.store
            .get_conflict(conflict_id)?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))
    }

    /// Field differences going from the local snapshot to the remote one
    pub fn conflict_diff(&self, conflict_id: &ConflictId) -> Result<FieldDiff> {
        let conflict = self.get_conflict(conflict_id)?;
        Ok(diff(
            &conflict.local_snapshot.data,
            &conflict.remote_snapshot.data,
        ))
    }

    /// Resolve an open conflict and return the entity as it now stands.
    ///
    /// `Resolution::Local` needs connectivity and an access token. A record
    /// can be resolved exactly once; later calls fail with `AlreadyResolved`.
    pub async fn resolve(
        &self,
        conflict_id: &ConflictId,
        resolution: Resolution,
    ) -> Result<EntitySnapshot> {
        let mut conflict = self.get_conflict(conflict_id)?;
        if conflict.is_resolved() {
            return Err(Error::AlreadyResolved(conflict_id.to_string()));
        }

        let actor = self.actor();
        let entity_id = conflict.entity_id.to_string();
        let local = self
            .store
            .get(&conflict.entity_id)?
            .unwrap_or_else(|| conflict.local_snapshot.clone());

        let mut resolved = local.clone();
        let kept_data = match resolution {
            Resolution::Local => {
                if !self.is_online() {
                    return Err(Error::Offline);
                }
                let token = self.access_token()?;

                let pushed = if local.is_deleted {
                    self.remote.delete(&token, &entity_id).await.map(|()| None)
                } else {
                    self.remote
                        .update(
                            &token,
                            &entity_id,
                            &local.data,
                            conflict.remote_snapshot.version,
                        )
                        .await
                        .map(Some)
                };

                match pushed {
                    Ok(Some(server)) => {
                        resolved.adopt_remote(&server);
                        server.data
                    }
                    Ok(None) => {
                        resolved.sync_status = SyncStatus::Synced;
                        Value::Null
                    }
                    Err(RemoteError::Conflict(newer)) => {
                        tracing::warn!(
                            "Evaluation {entity_id} changed again on the server (version {}), conflict stays open",
                            newer.version
                        );
                        conflict.remote_timestamp = newer.updated_at;
                        conflict.remote_snapshot = newer.clone();
                        self.store.update_conflict(&conflict)?;
                        self.publish_status();
                        return Err(RemoteError::Conflict(newer).into());
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            Resolution::Remote => {
                resolved.adopt_remote(&conflict.remote_snapshot);
                conflict.remote_snapshot.data.clone()
            }
        };

        conflict.resolved_at = Some(now_ms());
        conflict.resolution = Some(resolution);
        conflict.resolved_by = Some(actor.id.clone());
        let kept_entity = (!resolved.is_deleted).then_some(&resolved);
        self.store.settle_conflict(&conflict, kept_entity)?;

        let reason = format!("conflict resolved: kept {}", resolution.as_str());
        self.record_version(&entity_id, &kept_data, &actor, &reason);
        self.audit.log(
            AuditEntry::new(&actor, AuditAction::ConflictResolved, conflict.entity_type.clone())
                .with_resource_id(&entity_id)
                .with_details(json!({
                    "conflictId": conflict.id.to_string(),
                    "resolution": resolution.as_str(),
                    "serverVersion": resolved.server_version,
                })),
        );
        self.publish_status();

        tracing::info!(
            "Resolved conflict {} on evaluation {entity_id}, kept {}",
            conflict.id,
            resolution.as_str()
        );
        Ok(resolved)
    }
}
