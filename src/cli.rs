use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// dbsnap: point-in-time snapshots of containerized databases
#[derive(Parser, Debug)]
#[command(name = "dbsnap", version, about = "Snapshot and restore databases running in containers.", long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Snapshot root directory (overrides config and DBSNAP_SNAPSHOT_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture a snapshot of a registered service
    Create {
        service: String,
        /// Label for the snapshot; used to select it on restore
        #[arg(short, long)]
        tag: Option<String>,
        /// Free-form note stored in the manifest
        #[arg(short, long, default_value = "")]
        note: String,
        /// none, gzip or zstd
        #[arg(short, long)]
        compression: Option<String>,
    },

    /// Restore a service from a snapshot (latest by default)
    Restore {
        service: String,
        /// Restore the snapshot with this tag
        #[arg(short, long, conflicts_with_all = ["latest", "before"])]
        tag: Option<String>,
        /// Restore the most recent snapshot
        #[arg(long, conflicts_with = "before")]
        latest: bool,
        /// Restore the newest snapshot created before this RFC3339 time
        #[arg(long, value_name = "TIME")]
        before: Option<String>,
        /// Continue past errors reported by the restore tool
        #[arg(short, long)]
        force: bool,
    },

    /// List snapshots, newest first
    List {
        /// Only this service
        service: Option<String>,
    },

    /// Find snapshots by service, tag, engine, image or note
    Search { query: String },

    /// Remove all but the newest snapshots of a service
    Prune {
        service: String,
        /// Number of snapshots to keep
        #[arg(short, long)]
        keep: usize,
        /// Show what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-hash a snapshot's files against its manifest
    Verify {
        service: String,
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Delete a tagged snapshot
    Delete { service: String, tag: String },

    /// Re-encode a snapshot under another compression mode
    Repack {
        service: String,
        /// none, gzip or zstd
        #[arg(short, long)]
        compression: String,
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Register a service in services.json
    Register {
        /// Logical service name used by every other command
        name: String,
        /// postgres, mysql, mariadb, redis, mongo
        #[arg(long)]
        engine: String,
        /// Container name or id
        #[arg(long)]
        container: String,
        #[arg(long, default_value = "")]
        image: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long, default_value = "")]
        database: String,
        /// Published host port (informational)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List registered services
    Services,

    /// Print CLI version
    Version,
}
