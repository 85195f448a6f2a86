use std::path::Path;

use fieldsync_core::models::SyncStatus;

use crate::cli::ExportFormat;
use crate::commands::common::{
    evaluation_to_list_item, format_evaluation_lines, format_version_lines, open_app,
    resolve_data, resolve_evaluation_id, write_output, EvaluationListItem, Paths,
};
use crate::error::CliError;

pub fn run_create(data: Option<&str>, paths: &Paths) -> Result<(), CliError> {
    let data = resolve_data(data)?;
    let app = open_app(paths)?;
    let created = app.evaluations().create(data)?;
    println!("{}", created.id);
    Ok(())
}

pub fn run_update(id: &str, data: Option<&str>, paths: &Paths) -> Result<(), CliError> {
    let data = resolve_data(data)?;
    let app = open_app(paths)?;
    let id = resolve_evaluation_id(id, &app)?;
    let updated = app.evaluations().update(&id, data)?;
    println!("Updated {} (local version {})", updated.id, updated.local_version);
    Ok(())
}

pub fn run_delete(id: &str, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let id = resolve_evaluation_id(id, &app)?;
    app.evaluations().delete(&id)?;
    println!("Deleted {id}");
    Ok(())
}

pub fn run_show(id: &str, as_json: bool, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let id = resolve_evaluation_id(id, &app)?;
    let snapshot = app
        .evaluations()
        .get(&id)?
        .ok_or_else(|| CliError::EvaluationNotFound(id.to_string()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("id:             {}", snapshot.id);
    println!("status:         {}", snapshot.sync_status);
    println!("local version:  {}", snapshot.local_version);
    match snapshot.server_version {
        Some(version) => println!("server version: {version}"),
        None => println!("server version: (never synced)"),
    }
    println!("{}", serde_json::to_string_pretty(&snapshot.data)?);
    Ok(())
}

pub fn run_list(status: Option<SyncStatus>, as_json: bool, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let evaluations = match status {
        Some(status) => app.evaluations().list_by_status(status)?,
        None => app.evaluations().list()?,
    };

    if as_json {
        let json_items = evaluations
            .iter()
            .map(evaluation_to_list_item)
            .collect::<Vec<EvaluationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if evaluations.is_empty() {
        println!("No evaluations.");
    } else {
        for line in format_evaluation_lines(&evaluations) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_history(id: &str, as_json: bool, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let id = resolve_evaluation_id(id, &app)?;
    let history = app.evaluations().history(&id)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else if history.is_empty() {
        println!("No versions recorded yet; versions appear once changes are synced.");
    } else {
        for line in format_version_lines(&history) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_restore(id: &str, version: i64, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let id = resolve_evaluation_id(id, &app)?;
    let restored = app.evaluations().restore(&id, version)?;
    println!(
        "Restored {} to the data of version {version}; change queued for sync",
        restored.id
    );
    Ok(())
}

pub fn run_export_history(
    id: &str,
    format: ExportFormat,
    output_path: Option<&Path>,
    paths: &Paths,
) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let id = resolve_evaluation_id(id, &app)?;
    let file = app.evaluations().export_history(&id, format.into())?;
    write_output(&file.bytes, output_path)
}
