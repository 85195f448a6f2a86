//! fieldsync CLI - Offline-first evaluation records from the terminal

use clap::Parser;

mod cli;
mod commands;
mod error;
mod session_store;


use cli::{AuditCommands, Cli, Commands, ConflictCommands, SyncCommands};
use commands::audit::{run_audit_export, run_audit_list, run_audit_prune};
use commands::common::Paths;
use commands::conflicts::{run_conflicts_list, run_conflicts_resolve, run_conflicts_show};
use commands::evaluations::{
    run_create, run_delete, run_export_history, run_history, run_list, run_restore, run_show,
    run_update,
};
use commands::session::{run_consent, run_login, run_logout};
use commands::sync::{run_sync, run_sync_status};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fieldsync=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = Paths::resolve(cli.db_path);

    match cli.command {
        Commands::Create { data } => run_create(data.as_deref(), &paths)?,
        Commands::Update { id, data } => run_update(&id, data.as_deref(), &paths)?,
        Commands::Delete { id } => run_delete(&id, &paths)?,
        Commands::Show { id, json } => run_show(&id, json, &paths)?,
        Commands::List { status, json } => run_list(status.map(Into::into), json, &paths)?,
        Commands::History { id, json } => run_history(&id, json, &paths)?,
        Commands::Restore { id, version } => run_restore(&id, version, &paths)?,
        Commands::ExportHistory { id, format, output } => {
            run_export_history(&id, format, output.as_deref(), &paths)?;
        }
        Commands::Sync { command } => match command {
            None => run_sync(&paths).await?,
            Some(SyncCommands::Status { json }) => run_sync_status(json, &paths)?,
        },
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { json } => run_conflicts_list(json, &paths)?,
            ConflictCommands::Show { id, json } => run_conflicts_show(&id, json, &paths)?,
            ConflictCommands::Resolve { id, keep } => {
                run_conflicts_resolve(&id, keep.into(), &paths).await?;
            }
        },
        Commands::Audit { command } => match command {
            AuditCommands::List {
                action,
                resource_id,
                limit,
                json,
            } => run_audit_list(
                action.as_deref(),
                resource_id.as_deref(),
                limit,
                json,
                &paths,
            )?,
            AuditCommands::Export {
                format,
                action,
                output,
            } => run_audit_export(format, action.as_deref(), output.as_deref(), &paths)?,
            AuditCommands::Prune => run_audit_prune(&paths)?,
        },
        Commands::Login {
            actor_id,
            label,
            token,
        } => run_login(&actor_id, label.as_deref(), &token, &paths)?,
        Commands::Logout { force } => run_logout(force, &paths)?,
        Commands::Consent {
            subject_id,
            scope,
            revoke,
        } => run_consent(&subject_id, &scope, revoke, &paths)?,
    }

    Ok(())
}
