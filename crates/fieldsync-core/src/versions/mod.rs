//! Append-only version history.
//!
//! Every entry holds the full snapshot plus a field diff against the previous
//! entry. Restoring appends a new entry; nothing is ever renumbered.

mod diff;

use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::export::{render_version_export, suggested_export_file_name, ExportFile, ExportFormat};
use crate::models::{FieldDiff, VersionEntry};
use crate::util::now_ms;

pub use diff::diff;

/// Version history over a `LocalStore`
pub struct VersionStore {
    store: Arc<dyn LocalStore>,
    /// Serializes `latest + 1` numbering across call sites
    append_lock: Mutex<()>,
}

impl VersionStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    /// Append the next version of a resource.
    ///
    /// The diff is computed against `previous_data` when given, otherwise
    /// against the latest stored version. Version 1 carries no diff.
    pub fn save_version(
        &self,
        resource_type: &str,
        resource_id: &str,
        data: &serde_json::Value,
        changed_by: &str,
        reason: Option<&str>,
        previous_data: Option<&serde_json::Value>,
    ) -> Result<VersionEntry> {
        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let latest = self.store.latest_version(resource_type, resource_id)?;
        let version = latest.as_ref().map_or(1, |latest| latest.version + 1);
        let field_diff = latest.as_ref().map(|latest| {
            let previous = previous_data.unwrap_or(&latest.data);
            diff(previous, data)
        });

        let entry = VersionEntry {
            id: Uuid::now_v7().to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            version,
            data: data.clone(),
            changed_by: changed_by.to_string(),
            changed_at: now_ms(),
            change_reason: reason.map(str::to_string),
            diff: field_diff,
        };
        self.store.append_version(&entry)?;

        tracing::debug!("Saved {resource_type}/{resource_id} version {version}");
        Ok(entry)
    }

    /// All versions, highest first
    pub fn history(&self, resource_type: &str, resource_id: &str) -> Result<Vec<VersionEntry>> {
        self.store.list_versions(resource_type, resource_id)
    }

    pub fn get(
        &self,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> Result<Option<VersionEntry>> {
        self.store.get_version(resource_type, resource_id, version)
    }

    pub fn latest(&self, resource_type: &str, resource_id: &str) -> Result<Option<VersionEntry>> {
        self.store.latest_version(resource_type, resource_id)
    }

    fn require(&self, resource_type: &str, resource_id: &str, version: i64) -> Result<VersionEntry> {
        self.get(resource_type, resource_id, version)?.ok_or_else(|| {
            Error::NotFound(format!("version {version} of {resource_type}/{resource_id}"))
        })
    }

    /// Append a new version whose data equals `version`'s data
    pub fn restore(
        &self,
        resource_type: &str,
        resource_id: &str,
        version: i64,
        restored_by: &str,
    ) -> Result<VersionEntry> {
        let source = self.require(resource_type, resource_id, version)?;
        let reason = format!("restored from version {version}");
        self.save_version(
            resource_type,
            resource_id,
            &source.data,
            restored_by,
            Some(&reason),
            None,
        )
    }

    /// Field changes going from `from` to `to`
    pub fn diff(
        &self,
        resource_type: &str,
        resource_id: &str,
        from: i64,
        to: i64,
    ) -> Result<FieldDiff> {
        let older = self.require(resource_type, resource_id, from)?;
        let newer = self.require(resource_type, resource_id, to)?;
        Ok(diff(&older.data, &newer.data))
    }

    /// Export a resource's history in ascending version order
    pub fn export(
        &self,
        resource_type: &str,
        resource_id: &str,
        format: ExportFormat,
    ) -> Result<ExportFile> {
        let mut entries = self.history(resource_type, resource_id)?;
        entries.reverse();
        let rendered = render_version_export(&entries, format)?;
        Ok(ExportFile {
            bytes: rendered.into_bytes(),
            file_name: suggested_export_file_name("versions", format, now_ms()),
            format,
        })
    }
}
