//! Sign-in state, consent records and logout cleanup.

use std::sync::Arc;

use serde_json::json;

use crate::audit::AuditLog;
use crate::db::{LocalStore, META_LAST_PULL_AT};
use crate::models::{Actor, AuditAction, AuditEntry};
use crate::sync::SyncEngine;
use crate::Result;

const SESSION_RESOURCE: &str = "session";
const CONSENT_RESOURCE: &str = "consent";

/// What logout threw away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoutSummary {
    /// Queued changes that never reached the server
    pub discarded_changes: usize,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn LocalStore>,
    audit: Arc<AuditLog>,
    engine: Arc<SyncEngine>,
}

impl SessionService {
    pub fn new(store: Arc<dyn LocalStore>, audit: Arc<AuditLog>, engine: Arc<SyncEngine>) -> Self {
        Self {
            store,
            audit,
            engine,
        }
    }

    /// Current actor; `Actor::system()` when nobody is signed in
    pub fn actor(&self) -> Actor {
        self.engine.actor()
    }

    /// Record a successful sign-in and hand the token to the engine
    pub fn login(&self, actor: Actor, access_token: impl Into<String>) {
        tracing::info!("Signed in as {}", actor.id);
        self.engine.set_actor(actor.clone());
        self.engine.set_access_token(Some(access_token.into()));
        self.audit
            .log(AuditEntry::new(&actor, AuditAction::Login, SESSION_RESOURCE));
        self.engine.request_sync();
    }

    /// Pick up a session persisted by an earlier process.
    ///
    /// Unlike `login` nothing is audited; the sign-in was recorded when it
    /// happened.
    pub fn resume(&self, actor: Actor, access_token: impl Into<String>) {
        tracing::debug!("Resumed session of {}", actor.id);
        self.engine.set_actor(actor);
        self.engine.set_access_token(Some(access_token.into()));
    }

    pub fn login_failed(&self, attempted_by: &str, reason: &str) {
        tracing::warn!("Sign-in failed for {attempted_by}: {reason}");
        let actor = Actor::new(attempted_by, attempted_by);
        self.audit.log(
            AuditEntry::new(&actor, AuditAction::LoginFailed, SESSION_RESOURCE).failed(reason),
        );
    }

    /// Sign out and clear local records.
    ///
    /// Snapshots and queued changes are dropped; the audit log, version
    /// history and conflict records stay. The pull cursor is reset so the
    /// next sign-in fetches everything again.
    pub fn logout(&self) -> Result<LogoutSummary> {
        let actor = self.engine.actor();
        let discarded_changes = self.store.dequeue_all()?.len();
        if discarded_changes > 0 {
            tracing::warn!("Signing out with {discarded_changes} unsynced changes");
        }

        self.engine.cancel();
        self.audit.log(
            AuditEntry::new(&actor, AuditAction::Logout, SESSION_RESOURCE)
                .with_details(json!({ "discardedChanges": discarded_changes })),
        );

        self.store.clear_all()?;
        self.store.delete_meta(META_LAST_PULL_AT)?;
        self.engine.set_access_token(None);
        self.engine.set_actor(Actor::system());
        self.engine.publish_status();

        tracing::info!("Signed out {}", actor.id);
        Ok(LogoutSummary { discarded_changes })
    }

    /// Record that `subject_id` granted or revoked consent
    pub fn record_consent(&self, subject_id: &str, granted: bool, scope: &str) {
        let action = if granted {
            AuditAction::ConsentGranted
        } else {
            AuditAction::ConsentRevoked
        };
        self.audit.log(
            AuditEntry::new(&self.engine.actor(), action, CONSENT_RESOURCE)
                .with_resource_id(subject_id)
                .with_details(json!({ "scope": scope })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{AuditFilter, EntitySnapshot, MutationAction, PendingMutation};
    use crate::remote::memory::InMemoryRemote;
    use crate::versions::VersionStore;
    use serde_json::json;

    fn session() -> (SessionService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let versions = Arc::new(VersionStore::new(store.clone()));
        let audit = Arc::new(AuditLog::new(store.clone()));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            Arc::new(InMemoryRemote::new()),
            versions,
            audit.clone(),
        ));
        (SessionService::new(store.clone(), audit, engine), store)
    }

    fn actions(store: &MemoryStore) -> Vec<AuditAction> {
        store
            .query_audit(&AuditFilter::default())
            .unwrap()
            .into_iter()
            .rev()
            .map(|entry| entry.action)
            .collect()
    }

    #[test]
    fn login_sets_actor_and_is_audited() {
        let (session, store) = session();
        session.login(Actor::new("u1", "Nurse Ada"), "token");

        assert_eq!(session.actor().id, "u1");
        assert_eq!(actions(&store), vec![AuditAction::Login]);
    }

    #[test]
    fn resumed_session_is_not_audited() {
        let (session, store) = session();
        session.resume(Actor::new("u1", "Nurse Ada"), "token");

        assert_eq!(session.actor().id, "u1");
        assert!(actions(&store).is_empty());
    }

    #[test]
    fn failed_login_is_audited_as_failure() {
        let (session, store) = session();
        session.login_failed("u9", "bad password");

        let entries = store.query_audit(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].action, AuditAction::LoginFailed);
        assert!(!entries[0].success);
        assert_eq!(entries[0].error_message.as_deref(), Some("bad password"));
    }

    #[test]
    fn logout_clears_records_but_keeps_audit_and_resets_pull_cursor() {
        let (session, store) = session();
        session.login(Actor::new("u1", "Ada"), "token");
        let snapshot = EntitySnapshot::new(json!({}));
        store
            .put_with_mutation(
                &snapshot,
                &PendingMutation::new(snapshot.id, MutationAction::Create, None),
            )
            .unwrap();
        store.set_meta(META_LAST_PULL_AT, "42").unwrap();

        let summary = session.logout().unwrap();

        assert_eq!(summary.discarded_changes, 1);
        assert!(store.get_all().unwrap().is_empty());
        assert!(store.dequeue_all().unwrap().is_empty());
        assert_eq!(store.get_meta(META_LAST_PULL_AT).unwrap(), None);
        assert_eq!(actions(&store), vec![AuditAction::Login, AuditAction::Logout]);
        assert_eq!(session.actor(), Actor::system());
    }

    #[test]
    fn consent_changes_are_recorded() {
        let (session, store) = session();
        session.record_consent("client-7", true, "photos");
        session.record_consent("client-7", false, "photos");

        assert_eq!(
            actions(&store),
            vec![AuditAction::ConsentGranted, AuditAction::ConsentRevoked]
        );
    }
}
