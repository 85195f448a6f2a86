//! Evaluation (entity snapshot) model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::remote::RemoteEntity;
use crate::util::now_ms;

/// Resource type used for evaluations in the version store and audit log.
pub const EVALUATION_RESOURCE: &str = "evaluation";

/// A unique identifier for an entity, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where an entity stands relative to the remote authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local state matches the last authoritative snapshot
    Synced,
    /// Local changes are queued for the remote authority
    Pending,
    /// The remote authority rejected a write; waiting for resolution
    Conflict,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full local representation of an evaluation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// Stable, client-generated identifier
    pub id: EntityId,
    /// Domain payload
    pub data: serde_json::Value,
    /// Device-local version, +1 per local mutation
    pub local_version: i64,
    /// Last authoritative version, `None` until first synced
    pub server_version: Option<i64>,
    /// Sync state
    pub sync_status: SyncStatus,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Tombstone for a delete that has not reached the server yet
    #[serde(default)]
    pub is_deleted: bool,
}

impl EntitySnapshot {
    /// Create a brand-new local entity awaiting its first sync
    #[must_use]
    pub fn new(data: serde_json::Value) -> Self {
        Self::with_id(EntityId::new(), data)
    }

    /// Create a new local entity with a caller-supplied id
    #[must_use]
    pub fn with_id(id: EntityId, data: serde_json::Value) -> Self {
        Self {
            id,
            data,
            local_version: 1,
            server_version: None,
            sync_status: SyncStatus::Pending,
            updated_at: now_ms(),
            is_deleted: false,
        }
    }

    /// Build a synced entity straight from an authoritative snapshot
    pub fn from_remote(remote: &RemoteEntity) -> Result<Self, uuid::Error> {
        Ok(Self {
            id: remote.id.parse()?,
            data: remote.data.clone(),
            local_version: 0,
            server_version: Some(remote.version),
            sync_status: SyncStatus::Synced,
            updated_at: remote.updated_at,
            is_deleted: false,
        })
    }

    /// Record a local edit
    pub fn apply_local_change(&mut self, data: serde_json::Value) {
        self.data = data;
        self.bump_local();
    }

    /// Record a local delete (kept as a tombstone until synced)
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.bump_local();
    }

    /// Adopt the authoritative snapshot returned by the remote authority
    pub fn adopt_remote(&mut self, remote: &RemoteEntity) {
        self.data = remote.data.clone();
        self.server_version = Some(
            self.server_version
                .map_or(remote.version, |current| current.max(remote.version)),
        );
        self.sync_status = SyncStatus::Synced;
        self.updated_at = remote.updated_at;
        self.is_deleted = false;
    }

    /// Whether the remote authority has ever acknowledged this entity
    #[must_use]
    pub const fn is_known_remotely(&self) -> bool {
        self.server_version.is_some()
    }

    fn bump_local(&mut self) {
        self.local_version += 1;
        self.sync_status = SyncStatus::Pending;
        self.updated_at = now_ms().max(self.updated_at);
    }
}
