//! Signed-in session kept in the OS keychain between CLI invocations.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use fieldsync_core::models::Actor;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "fieldsync-cli";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub actor_id: String,
    pub actor_label: String,
    pub access_token: String,
}

impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("actor_id", &self.actor_id)
            .field("actor_label", &self.actor_label)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl StoredSession {
    pub fn new(actor: &Actor, access_token: impl Into<String>) -> Self {
        Self {
            actor_id: actor.id.clone(),
            actor_label: actor.label.clone(),
            access_token: access_token.into(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(&self.actor_id, &self.actor_label)
    }
}

/// Keychain slot for one local database
#[derive(Debug, Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn for_database(db_path: &std::path::Path) -> Self {
        Self {
            username: format!("session:{}", db_path.display()),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, CliError> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| CliError::SecureStorage(error.to_string()))
    }

    #[cfg(not(test))]
    pub fn load(&self) -> Result<Option<StoredSession>, CliError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(CliError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn load(&self) -> Result<Option<StoredSession>, CliError> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::SecureStorage(error.to_string()))?;
        match guard.get(&self.username) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    #[cfg(not(test))]
    pub fn save(&self, session: &StoredSession) -> Result<(), CliError> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| CliError::SecureStorage(error.to_string()))
    }

    #[cfg(test)]
    pub fn save(&self, session: &StoredSession) -> Result<(), CliError> {
        let raw = serde_json::to_string(session)?;
        Self::test_store()
            .lock()
            .map_err(|error| CliError::SecureStorage(error.to_string()))?
            .insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    pub fn clear(&self) -> Result<(), CliError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(CliError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn clear(&self) -> Result<(), CliError> {
        Self::test_store()
            .lock()
            .map_err(|error| CliError::SecureStorage(error.to_string()))?
            .remove(&self.username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn session_roundtrip_and_clear() {
        let store = SessionStore::for_database(Path::new("/tmp/roundtrip/fieldsync.db"));
        let session = StoredSession::new(&Actor::new("agent-1", "Agent One"), "secret");

        assert_eq!(store.load().unwrap(), None);
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session.clone()));
        assert_eq!(session.actor(), Actor::new("agent-1", "Agent One"));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn sessions_are_scoped_per_database() {
        let first = SessionStore::for_database(Path::new("/tmp/scoped/a.db"));
        let second = SessionStore::for_database(Path::new("/tmp/scoped/b.db"));
        first
            .save(&StoredSession::new(&Actor::new("agent-1", "Agent One"), "t"))
            .unwrap();

        assert!(first.load().unwrap().is_some());
        assert_eq!(second.load().unwrap(), None);
    }

    #[test]
    fn debug_output_redacts_token() {
        let session = StoredSession::new(&Actor::new("agent-1", "Agent One"), "secret");
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("agent-1"));
    }
}
