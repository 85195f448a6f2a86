//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{EntityId, EntitySnapshot};
use crate::remote::RemoteEntity;
use crate::util::now_ms;

/// Identifier for a conflict record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which side of a conflict wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Keep the device's snapshot and push it over the remote one
    Local,
    /// Discard local changes and adopt the remote snapshot
    Remote,
}

impl Resolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// Divergent local and remote snapshots captured for human resolution.
///
/// Both snapshots are kept after resolution; only `resolved_at`,
/// `resolution` and `resolved_by` change, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub local_snapshot: EntitySnapshot,
    pub remote_snapshot: RemoteEntity,
    /// Local entity's last update (Unix ms)
    pub local_timestamp: i64,
    /// Remote snapshot's last update (Unix ms)
    pub remote_timestamp: i64,
    /// When the conflict was detected (Unix ms)
    pub detected_at: i64,
    pub resolved_at: Option<i64>,
    pub resolution: Option<Resolution>,
    pub resolved_by: Option<String>,
}

impl ConflictRecord {
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        local_snapshot: EntitySnapshot,
        remote_snapshot: RemoteEntity,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            entity_type: entity_type.into(),
            entity_id: local_snapshot.id,
            local_timestamp: local_snapshot.updated_at,
            remote_timestamp: remote_snapshot.updated_at,
            local_snapshot,
            remote_snapshot,
            detected_at: now_ms(),
            resolved_at: None,
            resolution: None,
            resolved_by: None,
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// The snapshot data that lost, once resolved
    #[must_use]
    pub const fn losing_data(&self) -> Option<&serde_json::Value> {
        match self.resolution {
            Some(Resolution::Local) => Some(&self.remote_snapshot.data),
            Some(Resolution::Remote) => Some(&self.local_snapshot.data),
            None => None,
        }
    }
}
