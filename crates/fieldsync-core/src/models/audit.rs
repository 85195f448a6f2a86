//! Audit trail models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::now_ms;

/// Who performed an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub label: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Actor used for engine-initiated actions when nobody is signed in
    #[must_use]
    pub fn system() -> Self {
        Self::new("system", "fieldsync")
    }
}

/// Audited action taxonomy (CRUD, auth, consent, export, sync)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Restore,
    Login,
    LoginFailed,
    Logout,
    ConsentGranted,
    ConsentRevoked,
    Export,
    SyncConflict,
    ConflictResolved,
}

impl AuditAction {
    pub const ALL: [Self; 13] = [
        Self::Create,
        Self::Read,
        Self::Update,
        Self::Delete,
        Self::Restore,
        Self::Login,
        Self::LoginFailed,
        Self::Logout,
        Self::ConsentGranted,
        Self::ConsentRevoked,
        Self::Export,
        Self::SyncConflict,
        Self::ConflictResolved,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::Logout => "logout",
            Self::ConsentGranted => "consent_granted",
            Self::ConsentRevoked => "consent_revoked",
            Self::Export => "export",
            Self::SyncConflict => "sync_conflict",
            Self::ConflictResolved => "conflict_resolved",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown audit action: {s}"))
    }
}

/// An immutable record of one consequential action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    /// Store-assigned insertion order; 0 until persisted
    #[serde(default)]
    pub seq: i64,
    /// Unix ms
    pub timestamp: i64,
    pub actor_id: String,
    pub actor_label: String,
    pub action: AuditAction,
    pub resource: String,
    pub resource_id: Option<String>,
    /// Best-effort network address or client identifier
    pub client_context: Option<String>,
    pub details: serde_json::Value,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn new(actor: &Actor, action: AuditAction, resource: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            seq: 0,
            timestamp: now_ms(),
            actor_id: actor.id.clone(),
            actor_label: actor.label.clone(),
            action,
            resource: resource.into(),
            resource_id: None,
            client_context: None,
            details: serde_json::Value::Null,
            success: true,
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_client_context(mut self, client_context: Option<String>) -> Self {
        self.client_context = client_context;
        self
    }

    /// Mark the described action as failed
    #[must_use]
    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }
}

/// Audit query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub action: Option<AuditAction>,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    /// Inclusive lower bound (Unix ms)
    pub from: Option<i64>,
    /// Inclusive upper bound (Unix ms)
    pub to: Option<i64>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    #[must_use]
    pub fn for_resource(resource: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            resource_id: Some(resource_id.into()),
            ..Self::default()
        }
    }

    /// Check a single entry against the filter (limit is not considered)
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor_id
            .as_ref()
            .map_or(true, |actor_id| &entry.actor_id == actor_id)
            && self.action.map_or(true, |action| entry.action == action)
            && self
                .resource
                .as_ref()
                .map_or(true, |resource| &entry.resource == resource)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |resource_id| entry.resource_id.as_ref() == Some(resource_id))
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
            && self.success.map_or(true, |success| entry.success == success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_action_string_roundtrip() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert!("teleport".parse::<AuditAction>().is_err());
    }

    #[test]
    fn failed_entry_records_error() {
        let entry = AuditEntry::new(&Actor::system(), AuditAction::Update, "evaluation")
            .with_resource_id("e1")
            .failed("boom");
        assert!(!entry.success);
        assert_eq!(entry.error_message.as_deref(), Some("boom"));
        assert_eq!(entry.resource_id.as_deref(), Some("e1"));
    }

    #[test]
    fn filter_matches_on_every_set_field() {
        let actor = Actor::new("u1", "Agent One");
        let entry = AuditEntry::new(&actor, AuditAction::Create, "evaluation").with_resource_id("e1");

        assert!(AuditFilter::default().matches(&entry));
        assert!(AuditFilter::for_resource("evaluation", "e1").matches(&entry));
        assert!(!AuditFilter::for_resource("evaluation", "e2").matches(&entry));

        let filter = AuditFilter {
            actor_id: Some("u1".into()),
            action: Some(AuditAction::Create),
            success: Some(true),
            from: Some(entry.timestamp),
            to: Some(entry.timestamp),
            ..AuditFilter::default()
        };
        assert!(filter.matches(&entry));

        let failed_only = AuditFilter {
            success: Some(false),
            ..AuditFilter::default()
        };
        assert!(!failed_only.matches(&entry));
    }
}
