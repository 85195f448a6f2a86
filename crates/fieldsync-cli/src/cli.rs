use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Offline-first evaluation records with versioned history and audit")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an evaluation from a JSON object (stdin when omitted)
    #[command(alias = "new")]
    Create {
        /// JSON object
        data: Option<String>,
    },
    /// Replace an evaluation's data
    Update {
        /// Evaluation ID or unique ID prefix
        id: String,
        /// JSON object (stdin when omitted)
        data: Option<String>,
    },
    /// Delete an evaluation
    Delete {
        /// Evaluation ID or unique ID prefix
        id: String,
    },
    /// Show one evaluation
    Show {
        /// Evaluation ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List evaluations
    List {
        /// Only evaluations in this sync state
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show an evaluation's version history
    History {
        /// Evaluation ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Bring back the data of an earlier version
    Restore {
        /// Evaluation ID or unique ID prefix
        id: String,
        /// Version number to restore
        version: i64,
    },
    /// Export an evaluation's version history
    ExportHistory {
        /// Evaluation ID or unique ID prefix
        id: String,
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Sync with the remote authority
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Query and export the audit log
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Sign in with an access token issued by the remote authority
    Login {
        /// Actor identifier recorded on every change
        #[arg(long)]
        actor_id: String,
        /// Human-readable actor label
        #[arg(long)]
        label: Option<String>,
        /// Access token
        #[arg(long, env = "FIELDSYNC_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Sign out and clear local records
    Logout {
        /// Discard changes that have not been synced yet
        #[arg(long)]
        force: bool,
    },
    /// Record a consent decision
    Consent {
        /// Subject the consent belongs to
        subject_id: String,
        /// Consent scope (e.g. photos, data-sharing)
        #[arg(long)]
        scope: String,
        /// Record a revocation instead of a grant
        #[arg(long)]
        revoke: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show sync status without syncing
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List unresolved conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show both sides of a conflict and their differences
    Show {
        /// Conflict ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict by keeping one whole side
    Resolve {
        /// Conflict ID
        id: String,
        /// Side to keep
        #[arg(long, value_enum)]
        keep: Side,
    },
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// List recent audit entries
    List {
        /// Only entries with this action (e.g. update, sync_conflict)
        #[arg(long)]
        action: Option<String>,
        /// Only entries about this resource id
        #[arg(long)]
        resource_id: Option<String>,
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export the audit log
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Only entries with this action
        #[arg(long)]
        action: Option<String>,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Delete entries older than the retention period
    Prune,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl From<ExportFormat> for fieldsync_core::export::ExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Csv => Self::Csv,
            ExportFormat::Json => Self::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Synced,
    Conflict,
}

impl From<StatusFilter> for fieldsync_core::models::SyncStatus {
    fn from(status: StatusFilter) -> Self {
        match status {
            StatusFilter::Pending => Self::Pending,
            StatusFilter::Synced => Self::Synced,
            StatusFilter::Conflict => Self::Conflict,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Side {
    Local,
    Remote,
}

impl From<Side> for fieldsync_core::models::Resolution {
    fn from(side: Side) -> Self {
        match side {
            Side::Local => Self::Local,
            Side::Remote => Self::Remote,
        }
    }
}
