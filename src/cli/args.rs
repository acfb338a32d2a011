use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{
    Limits, DEFAULT_MAX_EXPORT_BYTES, DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_GREP_MATCHES,
    DEFAULT_MAX_LIST_ENTRIES,
};

/// repo-snapshot - MCP server for coherent repository reads, snapshots and patches
#[derive(Parser)]
#[command(name = "repo-snapshot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Repository root (auto-detects git root if absent)
    #[arg(short = 'r', long, env = "REPO_SNAPSHOT_ROOT", global = true)]
    pub repo_root: Option<PathBuf>,

    /// Directory for the blob store and snapshot records. Defaults to a
    /// per-repository directory under the platform data dir
    #[arg(long, env = "REPO_SNAPSHOT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Largest file a single read or write may handle, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_BYTES, global = true)]
    pub max_file_bytes: u64,

    /// Upper bound on matches returned by one grep
    #[arg(long, default_value_t = DEFAULT_MAX_GREP_MATCHES, global = true)]
    pub max_grep_matches: usize,

    /// Largest archive snapshot.export may produce, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_EXPORT_BYTES, global = true)]
    pub max_export_bytes: u64,

    /// Upper bound on entries returned by one list page
    #[arg(long, default_value_t = DEFAULT_MAX_LIST_ENTRIES, global = true)]
    pub max_list_entries: usize,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn limits(&self) -> Limits {
        Limits {
            max_file_bytes: self.max_file_bytes,
            max_grep_matches: self.max_grep_matches,
            max_export_bytes: self.max_export_bytes,
            max_list_entries: self.max_list_entries,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as MCP server over stdio (the default)
    Serve,
    /// Print the live repository fingerprint as canonical JSON
    Fingerprint,
    /// Write a persisted snapshot as a tar archive
    Export {
        /// Snapshot id (sha256:<hex>)
        snapshot_id: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Re-hash every stored blob and report corrupt ones
    Verify,
}
