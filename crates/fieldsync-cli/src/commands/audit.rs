use std::path::Path;

use fieldsync_core::models::{AuditAction, AuditFilter};

use crate::cli::ExportFormat;
use crate::commands::common::{format_audit_lines, open_app, write_output, Paths};
use crate::error::CliError;

pub fn parse_action(raw: Option<&str>) -> Result<Option<AuditAction>, CliError> {
    raw.map(|raw| raw.parse::<AuditAction>())
        .transpose()
        .map_err(|error| CliError::Core(fieldsync_core::Error::InvalidInput(error)))
}

pub fn run_audit_list(
    action: Option<&str>,
    resource_id: Option<&str>,
    limit: usize,
    as_json: bool,
    paths: &Paths,
) -> Result<(), CliError> {
    let filter = AuditFilter {
        action: parse_action(action)?,
        resource_id: resource_id.map(str::to_string),
        limit: Some(limit),
        ..AuditFilter::default()
    };
    let app = open_app(paths)?;
    let entries = app.audit().query(&filter)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No audit entries.");
    } else {
        for line in format_audit_lines(&entries) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_audit_export(
    format: ExportFormat,
    action: Option<&str>,
    output_path: Option<&Path>,
    paths: &Paths,
) -> Result<(), CliError> {
    let filter = AuditFilter {
        action: parse_action(action)?,
        ..AuditFilter::default()
    };
    let app = open_app(paths)?;
    let file = app
        .audit()
        .export_matching(&app.session().actor(), &filter, format.into())?;
    write_output(&file.bytes, output_path)
}

pub fn run_audit_prune(paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let removed = app.prune_audit()?;
    println!("Removed {removed} audit entries");
    Ok(())
}
