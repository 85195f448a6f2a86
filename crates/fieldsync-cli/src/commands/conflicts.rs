use fieldsync_core::models::Resolution;

use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, open_app, open_sync_app, parse_conflict_id,
    ConflictListItem, Paths,
};
use crate::error::CliError;

pub fn run_conflicts_list(as_json: bool, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let conflicts = app.engine().list_unresolved()?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No unresolved conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_conflicts_show(id: &str, as_json: bool, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let conflict_id = parse_conflict_id(id)?;
    let conflict = app.engine().get_conflict(&conflict_id)?;
    let diff = app.engine().conflict_diff(&conflict_id)?;

    if as_json {
        let rendered = serde_json::json!({
            "conflict": conflict,
            "diff": diff,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    println!("conflict:   {}", conflict.id);
    println!("evaluation: {}", conflict.entity_id);
    println!("remote:     version {}", conflict.remote_snapshot.version);
    if let Some(resolution) = conflict.resolution {
        println!(
            "resolved:   kept {} ({})",
            resolution.as_str(),
            conflict.resolved_by.as_deref().unwrap_or("unknown")
        );
    }
    for (field, change) in diff.iter() {
        let render = |value: Option<&serde_json::Value>| {
            value.map_or_else(|| "(absent)".to_string(), ToString::to_string)
        };
        println!(
            "  {field}: local {} | remote {}",
            render(change.old.as_ref()),
            render(change.new.as_ref())
        );
    }
    Ok(())
}

pub async fn run_conflicts_resolve(
    id: &str,
    keep: Resolution,
    paths: &Paths,
) -> Result<(), CliError> {
    let conflict_id = parse_conflict_id(id)?;
    let app = if keep == Resolution::Local {
        open_sync_app(paths)?
    } else {
        open_app(paths)?
    };

    let resolved = app.engine().resolve(&conflict_id, keep).await?;
    println!(
        "Resolved conflict {conflict_id}: kept {} side of {}",
        keep.as_str(),
        resolved.id
    );
    Ok(())
}
