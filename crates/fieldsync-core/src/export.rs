//! Audit and version export rendering.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{AuditEntry, VersionEntry};
use crate::util::format_timestamp_ms;

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// Rendered export plus the name callers should offer when saving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub format: ExportFormat,
}

const AUDIT_CSV_HEADER: [&str; 11] = [
    "id",
    "timestamp",
    "actor_id",
    "actor_label",
    "action",
    "resource",
    "resource_id",
    "client_context",
    "success",
    "error_message",
    "details",
];

const VERSION_CSV_HEADER: [&str; 9] = [
    "id",
    "resource_type",
    "resource_id",
    "version",
    "changed_by",
    "changed_at",
    "change_reason",
    "data",
    "diff",
];

/// Quote a CSV field when it contains a delimiter, quote or line break.
#[must_use]
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_csv_row<S: AsRef<str>>(output: &mut String, fields: &[S]) {
    let row = fields
        .iter()
        .map(|field| csv_field(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    let _ = writeln!(output, "{row}");
}

fn json_cell(value: &serde_json::Value) -> String {
    if value.is_null() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Render audit entries as CSV. The header row is always present.
#[must_use]
pub fn render_audit_csv(entries: &[AuditEntry]) -> String {
    let mut output = String::new();
    write_csv_row(&mut output, &AUDIT_CSV_HEADER);

    for entry in entries {
        write_csv_row(
            &mut output,
            &[
                entry.id.clone(),
                format_timestamp_ms(entry.timestamp),
                entry.actor_id.clone(),
                entry.actor_label.clone(),
                entry.action.to_string(),
                entry.resource.clone(),
                entry.resource_id.clone().unwrap_or_default(),
                entry.client_context.clone().unwrap_or_default(),
                entry.success.to_string(),
                entry.error_message.clone().unwrap_or_default(),
                json_cell(&entry.details),
            ],
        );
    }

    output
}

/// Render version entries as CSV. The header row is always present.
#[must_use]
pub fn render_version_csv(entries: &[VersionEntry]) -> String {
    let mut output = String::new();
    write_csv_row(&mut output, &VERSION_CSV_HEADER);

    for entry in entries {
        let diff = entry
            .diff
            .as_ref()
            .and_then(|diff| serde_json::to_string(diff).ok())
            .unwrap_or_default();
        write_csv_row(
            &mut output,
            &[
                entry.id.clone(),
                entry.resource_type.clone(),
                entry.resource_id.clone(),
                entry.version.to_string(),
                entry.changed_by.clone(),
                format_timestamp_ms(entry.changed_at),
                entry.change_reason.clone().unwrap_or_default(),
                json_cell(&entry.data),
                diff,
            ],
        );
    }

    output
}

/// Render any serializable records as a pretty-printed JSON array.
pub fn render_json<T: Serialize>(records: &[T]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(records)
}

/// Render audit entries in the selected format.
pub fn render_audit_export(
    entries: &[AuditEntry],
    format: ExportFormat,
) -> serde_json::Result<String> {
    match format {
        ExportFormat::Csv => Ok(render_audit_csv(entries)),
        ExportFormat::Json => render_json(entries),
    }
}

/// Render version entries in the selected format.
pub fn render_version_export(
    entries: &[VersionEntry],
    format: ExportFormat,
) -> serde_json::Result<String> {
    match format {
        ExportFormat::Csv => Ok(render_version_csv(entries)),
        ExportFormat::Json => render_json(entries),
    }
}

/// Build a default file name carrying the export date, e.g.
/// `fieldsync-audit-2026-10-16.csv`.
#[must_use]
pub fn suggested_export_file_name(kind: &str, format: ExportFormat, timestamp_ms: i64) -> String {
    let date = chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |value| value.format("%Y-%m-%d").to_string(),
    );
    format!("fieldsync-{kind}-{date}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Actor, AuditAction};
    use serde_json::json;

    #[test]
    fn empty_audit_csv_is_header_only() {
        let rendered = render_audit_csv(&[]);
        assert_eq!(
            rendered,
            "id,timestamp,actor_id,actor_label,action,resource,resource_id,client_context,success,error_message,details\n"
        );
    }

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn audit_csv_row_escapes_details() {
        let mut entry = AuditEntry::new(&Actor::new("u1", "Agent, Field"), AuditAction::Update, "evaluation")
            .with_resource_id("e1")
            .with_details(json!({"fields": ["score"]}));
        entry.timestamp = 0;

        let rendered = render_audit_csv(&[entry.clone()]);
        let row = rendered.lines().nth(1).unwrap();
        assert!(row.starts_with(&entry.id));
        assert!(row.contains("1970-01-01T00:00:00+00:00"));
        assert!(row.contains("\"Agent, Field\""));
        assert!(row.contains("\"{\"\"fields\"\":[\"\"score\"\"]}\""));
        assert!(row.contains(",true,"));
    }

    #[test]
    fn json_export_is_an_array() {
        let rendered = render_audit_export(&[], ExportFormat::Json).unwrap();
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn suggested_export_file_name_uses_date_and_extension() {
        // 2026-10-16T12:00:00Z
        let timestamp = 1_792_152_000_000;
        assert_eq!(
            suggested_export_file_name("audit", ExportFormat::Csv, timestamp),
            "fieldsync-audit-2026-10-16.csv"
        );
        assert_eq!(
            suggested_export_file_name("versions", ExportFormat::Json, timestamp),
            "fieldsync-versions-2026-10-16.json"
        );
    }

    #[test]
    fn export_format_parses_case_insensitively() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
