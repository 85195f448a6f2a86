use fieldsync_core::sync::{EngineStatus, SyncOutcome, SyncTrigger};

use crate::commands::common::{format_timestamp, open_app, open_sync_app, Paths};
use crate::error::CliError;

pub async fn run_sync(paths: &Paths) -> Result<(), CliError> {
    let app = open_sync_app(paths)?;

    match app.engine().sync_now(SyncTrigger::Manual).await? {
        SyncOutcome::Completed(report) => {
            println!(
                "Sync completed: {} pushed, {} pulled, {} conflicts, {} failed, {} audit entries uploaded",
                report.pushed,
                report.pulled,
                report.conflicts,
                report.failed,
                report.audit_uploaded
            );
            for error in &report.errors {
                println!("  error: {error}");
            }
            if report.conflicts > 0 {
                println!("Run `fieldsync conflicts list` to review conflicts.");
            }
        }
        SyncOutcome::Coalesced => println!("A sync is already running."),
        SyncOutcome::Offline => println!("Offline; changes stay queued."),
    }
    Ok(())
}

pub fn run_sync_status(as_json: bool, paths: &Paths) -> Result<(), CliError> {
    let app = open_app(paths)?;
    let status = app.engine().status();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for line in format_status_lines(&status, app.config().is_some()) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(status: &EngineStatus, remote_configured: bool) -> Vec<String> {
    let mut lines = vec![
        format!(
            "remote:     {}",
            if remote_configured {
                "configured"
            } else {
                "not configured (local only)"
            }
        ),
        format!("pending:    {}", status.pending_count),
        format!("conflicts:  {}", status.conflict_count),
        format!("stalled:    {}", status.error_count),
        format!(
            "last sync:  {}",
            status
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
    ];
    if let Some(error) = &status.last_error {
        lines.push(format!("last error: {error}"));
    }
    if status.storage_degraded {
        lines.push("storage:    in-memory fallback, changes are lost on exit".to_string());
    }
    lines
}
