//! Append-only audit log.
//!
//! `log` never fails: storage errors are reported through `tracing` and
//! counted, and the action being described proceeds regardless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::db::LocalStore;
use crate::error::Result;
use crate::export::{render_audit_export, suggested_export_file_name, ExportFile, ExportFormat};
use crate::models::{Actor, AuditAction, AuditEntry, AuditFilter};
use crate::util::now_ms;

const MS_PER_DAY: i64 = 86_400_000;

/// Audit trail writer and reader
pub struct AuditLog {
    store: Arc<dyn LocalStore>,
    client_context: Option<String>,
    dropped: AtomicU64,
}

impl AuditLog {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            client_context: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Default client context stamped on entries that carry none
    #[must_use]
    pub fn with_client_context(mut self, client_context: impl Into<String>) -> Self {
        self.client_context = Some(client_context.into());
        self
    }

    /// Append an entry. Failures are logged and counted, never returned.
    pub fn log(&self, mut entry: AuditEntry) {
        if entry.client_context.is_none() {
            entry.client_context.clone_from(&self.client_context);
        }

        match self.store.append_audit(&entry) {
            Ok(seq) => {
                tracing::debug!(
                    "Audit {} {} {} (seq {seq})",
                    entry.action,
                    entry.resource,
                    entry.resource_id.as_deref().unwrap_or("-")
                );
            }
            Err(error) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = %entry.action,
                    resource = %entry.resource,
                    resource_id = entry.resource_id.as_deref().unwrap_or("-"),
                    success = entry.success,
                    "Failed to persist audit entry {}: {error}",
                    entry.id
                );
            }
        }
    }

    /// Number of entries that could not be persisted since startup
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Matching entries, newest first
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.store.query_audit(filter)
    }

    /// Every entry about one resource, newest first
    pub fn history(&self, resource: &str, resource_id: &str) -> Result<Vec<AuditEntry>> {
        self.query(&AuditFilter::for_resource(resource, resource_id))
    }

    /// Export the whole log
    pub fn export(&self, actor: &Actor, format: ExportFormat) -> Result<ExportFile> {
        self.export_matching(actor, &AuditFilter::default(), format)
    }

    /// Export matching entries; the export itself is audited
    pub fn export_matching(
        &self,
        actor: &Actor,
        filter: &AuditFilter,
        format: ExportFormat,
    ) -> Result<ExportFile> {
        let entries = self.query(filter)?;
        let rendered = render_audit_export(&entries, format)?;
        let file = ExportFile {
            bytes: rendered.into_bytes(),
            file_name: suggested_export_file_name("audit", format, now_ms()),
            format,
        };

        self.log(
            AuditEntry::new(actor, AuditAction::Export, "audit_log").with_details(json!({
                "format": format.extension(),
                "entries": entries.len(),
                "fileName": file.file_name,
            })),
        );

        Ok(file)
    }

    /// Delete entries older than `retention_days`; returns how many
    pub fn prune(&self, retention_days: u32) -> Result<usize> {
        let cutoff = now_ms() - i64::from(retention_days) * MS_PER_DAY;
        let removed = self.store.prune_audit(cutoff)?;
        if removed > 0 {
            tracing::info!("Pruned {removed} audit entries older than {retention_days} days");
        }
        Ok(removed)
    }
}
