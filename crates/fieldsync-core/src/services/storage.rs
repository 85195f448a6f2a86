//! Opening the local store with corruption recovery and an in-memory fallback.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::ErrorCode;

use crate::db::{LocalStore, MemoryStore, SqliteStore};
use crate::{Error, Result};

/// Where local data currently lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// `SQLite` file on disk
    Durable { path: PathBuf },
    /// In-memory store chosen on purpose (tests, dry runs)
    InMemory,
    /// Durable storage failed to open; nothing survives a restart
    Degraded { reason: String },
}

impl StorageMode {
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable { path } => write!(f, "durable ({})", path.display()),
            Self::InMemory => f.write_str("in-memory"),
            Self::Degraded { reason } => write!(f, "degraded in-memory ({reason})"),
        }
    }
}

/// An opened local store and how it was obtained
#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn LocalStore>,
    mode: StorageMode,
}

impl StorageService {
    /// Open the database at `db_path`.
    ///
    /// A corrupted file is moved aside and a fresh database is created once.
    /// If that also fails the service falls back to memory and reports
    /// `StorageMode::Degraded`.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        match Self::open_durable(&db_path) {
            Ok(store) => {
                tracing::info!("Opened local store at {}", db_path.display());
                Self {
                    store: Arc::new(store),
                    mode: StorageMode::Durable { path: db_path },
                }
            }
            Err(error) => {
                tracing::error!(
                    "Local store at {} is unavailable, continuing in memory: {error}",
                    db_path.display()
                );
                Self {
                    store: Arc::new(MemoryStore::new()),
                    mode: StorageMode::Degraded {
                        reason: error.to_string(),
                    },
                }
            }
        }
    }

    /// Open a durable store or fail; no fallback
    pub fn open_durable_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let store = Self::open_durable(&db_path)?;
        Ok(Self {
            store: Arc::new(store),
            mode: StorageMode::Durable { path: db_path },
        })
    }

    pub fn open_in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            mode: StorageMode::InMemory,
        }
    }

    /// Wrap an existing store (custom backends, tests)
    pub fn from_store(store: Arc<dyn LocalStore>, mode: StorageMode) -> Self {
        Self { store, mode }
    }

    pub fn store(&self) -> Arc<dyn LocalStore> {
        Arc::clone(&self.store)
    }

    pub const fn mode(&self) -> &StorageMode {
        &self.mode
    }

    fn open_durable(db_path: &Path) -> Result<SqliteStore> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match SqliteStore::open(db_path) {
            Ok(store) => Ok(store),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is corrupted: {error}. Moving it aside and starting fresh.",
                    db_path.display()
                );
                Self::quarantine_corrupted_db_files(db_path)?;
                SqliteStore::open(db_path)
            }
            Err(error) => Err(error),
        }
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        if let Error::Database(rusqlite::Error::SqliteFailure(failure, _)) = error {
            if matches!(
                failure.code,
                ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt
            ) {
                return true;
            }
        }
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        // WAL and shared-memory sidecars belong to the moved file
        let sidecar_prefix = format!("{base_name}-");
        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale local store file {}", path.display());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntitySnapshot;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn open_path_creates_durable_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("fieldsync.db");

        let service = StorageService::open_path(&path);
        assert_eq!(service.mode(), &StorageMode::Durable { path: path.clone() });

        let snapshot = EntitySnapshot::new(json!({"a": 1}));
        service.store().put(&snapshot).unwrap();
        drop(service);

        let reopened = StorageService::open_path(&path);
        assert_eq!(reopened.store().get(&snapshot.id).unwrap(), Some(snapshot));
    }

    #[test]
    fn corrupted_file_is_quarantined_and_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fieldsync.db");
        std::fs::write(&path, vec![0x42; 4096]).unwrap();

        let service = StorageService::open_path(&path);
        assert!(!service.mode().is_degraded());
        assert!(service.store().get_all().unwrap().is_empty());

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("fieldsync.db.corrupt-")
            })
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn quarantine_moves_db_and_removes_sidecars() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fieldsync.db");
        let wal_path = dir.path().join("fieldsync.db-wal");
        let shm_path = dir.path().join("fieldsync.db-shm");
        let unrelated = dir.path().join("other.db-wal");
        std::fs::write(&path, b"bad-db").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();
        std::fs::write(&shm_path, b"shm").unwrap();
        std::fs::write(&unrelated, b"keep").unwrap();

        StorageService::quarantine_corrupted_db_files(&path).unwrap();

        assert!(!path.exists());
        assert!(!wal_path.exists());
        assert!(!shm_path.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn unopenable_path_falls_back_to_memory() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let service = StorageService::open_path(blocker.join("fieldsync.db"));
        assert!(service.mode().is_degraded());

        let snapshot = EntitySnapshot::new(json!({}));
        service.store().put(&snapshot).unwrap();
        assert!(service.store().get(&snapshot.id).unwrap().is_some());
    }

    #[test]
    fn detects_corruption_messages() {
        assert!(StorageService::is_corrupted_db_error(&Error::StorageUnavailable(
            "file is not a database".into()
        )));
        assert!(!StorageService::is_corrupted_db_error(&Error::InvalidInput(
            "bad".into()
        )));
    }
}
