//! Pending mutation (queue item) model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::EntityId;
use crate::util::now_ms;

/// Identifier for a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of change a queue item replays against the remote authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown mutation action: {other}")),
        }
    }
}

/// A local change that has not yet been confirmed by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: MutationId,
    pub entity_id: EntityId,
    pub action: MutationAction,
    /// Full entity data at the time of the mutation; `None` for deletes
    pub payload: Option<serde_json::Value>,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Failed delivery attempts so far
    pub retry_count: u32,
}

impl PendingMutation {
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        action: MutationAction,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: MutationId::new(),
            entity_id,
            action,
            payload,
            enqueued_at: now_ms(),
            retry_count: 0,
        }
    }

    /// Whether automatic retries gave up on this item
    #[must_use]
    pub const fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.retry_count >= max_attempts
    }
}
