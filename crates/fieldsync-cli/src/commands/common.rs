use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fieldsync_core::config::EngineConfig;
use fieldsync_core::models::{AuditEntry, ConflictId, ConflictRecord, EntityId, VersionEntry};
use fieldsync_core::{EntitySnapshot, FieldSync};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;
use crate::session_store::SessionStore;

/// Where the CLI keeps its state
#[derive(Debug, Clone)]
pub struct Paths {
    pub db_path: PathBuf,
}

impl Paths {
    pub fn resolve(cli_db_path: Option<PathBuf>) -> Self {
        Self {
            db_path: resolve_db_path(cli_db_path),
        }
    }

    /// Keychain slot holding the session for this database
    pub fn session_store(&self) -> SessionStore {
        SessionStore::for_database(&self.db_path)
    }
}

#[derive(Debug, Serialize)]
pub struct EvaluationListItem {
    pub id: String,
    pub preview: String,
    pub sync_status: String,
    pub server_version: Option<i64>,
    pub local_version: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub id: String,
    pub evaluation_id: String,
    pub remote_version: i64,
    pub detected_at: i64,
    pub detected_at_iso: String,
}

/// Open the local database, talking to the remote authority when
/// `FIELDSYNC_API_URL` is set. A stored session is picked up automatically.
pub fn open_app(paths: &Paths) -> Result<FieldSync, CliError> {
    let app = match EngineConfig::from_env()? {
        Some(config) => FieldSync::open(&paths.db_path, config)?,
        None => FieldSync::open_local(&paths.db_path),
    };

    if app.storage_mode().is_degraded() {
        tracing::warn!("Using in-memory storage: {}", app.storage_mode());
    }

    if let Some(stored) = paths.session_store().load()? {
        app.session().resume(stored.actor(), stored.access_token);
    }
    Ok(app)
}

/// Like `open_app`, but sync must be configured and someone signed in
pub fn open_sync_app(paths: &Paths) -> Result<FieldSync, CliError> {
    let app = open_app(paths)?;
    if app.config().is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    if paths.session_store().load()?.is_none() {
        return Err(CliError::NotSignedIn);
    }
    Ok(app)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("fieldsync.db")
}

/// Evaluation data from the argument, or piped stdin when omitted
pub fn resolve_data(argument: Option<&str>) -> Result<Value, CliError> {
    let raw = match argument.and_then(normalize_text) {
        Some(raw) => raw,
        None => read_piped_stdin()?.ok_or(CliError::EmptyData)?,
    };
    parse_data(&raw)
}

pub fn parse_data(raw: &str) -> Result<Value, CliError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| CliError::InvalidData(error.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidData(format!("got {raw}")))
    }
}

pub fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_text(&buffer))
}

/// Full id, or a prefix matching exactly one local evaluation
pub fn resolve_evaluation_id(query: &str, app: &FieldSync) -> Result<EntityId, CliError> {
    let query = normalize_text(query).ok_or(CliError::EmptyId)?;
    if let Ok(id) = query.parse::<EntityId>() {
        return Ok(id);
    }

    let all_ids: Vec<EntityId> = app
        .evaluations()
        .list()?
        .into_iter()
        .map(|snapshot| snapshot.id)
        .collect();
    match_id_prefix(&query, &all_ids)
}

pub fn match_id_prefix(query: &str, ids: &[EntityId]) -> Result<EntityId, CliError> {
    let matching: Vec<&EntityId> = ids
        .iter()
        .filter(|id| id.to_string().starts_with(query))
        .collect();

    match matching.as_slice() {
        [] => Err(CliError::EvaluationNotFound(query.to_string())),
        [id] => Ok(**id),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn parse_conflict_id(raw: &str) -> Result<ConflictId, CliError> {
    raw.trim()
        .parse::<ConflictId>()
        .map_err(|_| CliError::InvalidConflictId(raw.to_string()))
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn data_preview(data: &Value, max_chars: usize) -> String {
    let collapsed = data.to_string();
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_evaluation_lines(evaluations: &[EntitySnapshot]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    evaluations
        .iter()
        .map(|snapshot| {
            let short = short_id(&snapshot.id.to_string());
            let preview = data_preview(&snapshot.data, 40);
            let relative_time = format_relative_time(snapshot.updated_at, now_ms);
            format!(
                "{short:<13}  {:<8}  {preview:<40}  {relative_time}",
                snapshot.sync_status.as_str()
            )
        })
        .collect()
}

pub fn evaluation_to_list_item(snapshot: &EntitySnapshot) -> EvaluationListItem {
    let now_ms = Utc::now().timestamp_millis();
    EvaluationListItem {
        id: snapshot.id.to_string(),
        preview: data_preview(&snapshot.data, 80),
        sync_status: snapshot.sync_status.to_string(),
        server_version: snapshot.server_version,
        local_version: snapshot.local_version,
        updated_at: snapshot.updated_at,
        relative_time: format_relative_time(snapshot.updated_at, now_ms),
    }
}

pub fn format_version_lines(versions: &[VersionEntry]) -> Vec<String> {
    versions
        .iter()
        .map(|entry| {
            let changed = entry.diff.as_ref().map_or_else(
                || "initial".to_string(),
                |diff| {
                    diff.iter()
                        .map(|(field, _)| field.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                },
            );
            format!(
                "v{:<4} {}  {:<12} {:<28} {changed}",
                entry.version,
                format_timestamp(entry.changed_at),
                entry.changed_by,
                entry.change_reason.as_deref().unwrap_or("-"),
            )
        })
        .collect()
}

pub fn conflict_to_list_item(conflict: &ConflictRecord) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.to_string(),
        evaluation_id: conflict.entity_id.to_string(),
        remote_version: conflict.remote_snapshot.version,
        detected_at: conflict.detected_at,
        detected_at_iso: format_timestamp(conflict.detected_at),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  evaluation={}  remote=v{}",
                format_timestamp(conflict.detected_at),
                conflict.id,
                short_id(&conflict.entity_id.to_string()),
                conflict.remote_snapshot.version
            )
        })
        .collect()
}

pub fn format_audit_lines(entries: &[AuditEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let outcome = if entry.success { "ok" } else { "FAILED" };
            format!(
                "{}  {:<18} {:<12} {:<12} {} {outcome}",
                format_timestamp(entry.timestamp),
                entry.action.as_str(),
                entry.actor_id,
                entry.resource,
                entry.resource_id.as_deref().map_or_else(|| "-".to_string(), short_id),
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Write to `path` and print it, or print the content itself
pub fn write_output(bytes: &[u8], output_path: Option<&Path>) -> Result<(), CliError> {
    if let Some(path) = output_path {
        std::fs::write(path, bytes)?;
        println!("{}", path.display());
    } else {
        println!("{}", String::from_utf8_lossy(bytes).trim_end());
    }
    Ok(())
}
