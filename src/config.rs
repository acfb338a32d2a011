//! Runtime configuration: repository root, data directory and per-call limits.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Default cap for a single file read or write (1 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_GREP_MATCHES: usize = 100;
/// Default cap for an exported archive (64 MiB).
pub const DEFAULT_MAX_EXPORT_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_LIST_ENTRIES: usize = 1000;

/// Namespace UUID for per-repository data directories
const REPO_SNAPSHOT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3f, 0x5c, 0x1e, 0x92, 0x7a, 0x0b, 0x4d, 0x61, 0x9e, 0x2a, 0x51, 0xc8, 0x0d, 0x37, 0xb4, 0xe6,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_file_bytes: u64,
    pub max_grep_matches: usize,
    pub max_export_bytes: u64,
    pub max_list_entries: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_grep_matches: DEFAULT_MAX_GREP_MATCHES,
            max_export_bytes: DEFAULT_MAX_EXPORT_BYTES,
            max_list_entries: DEFAULT_MAX_LIST_ENTRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub repo_root: PathBuf,
    pub data_dir: PathBuf,
    pub limits: Limits,
}

impl Config {
    /// Build a config for `repo_root`, falling back to the per-repository
    /// default data directory when none is given.
    pub fn new(repo_root: PathBuf, data_dir: Option<PathBuf>, limits: Limits) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => default_data_dir(&repo_root)?,
        };
        Ok(Self {
            repo_root,
            data_dir,
            limits,
        })
    }
}

/// Compute a UUID v5 from the repository root path.
/// Deterministic: the same root always maps to the same data directory.
pub fn compute_path_uuid(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    Uuid::new_v5(&REPO_SNAPSHOT_NAMESPACE, normalized.as_bytes()).to_string()
}

/// `<platform data dir>/repo-snapshot/<uuid>`; kept outside the worktree so
/// persisted blobs never show up in the working-tree status.
pub fn default_data_dir(repo_root: &Path) -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .context("Could not determine a data directory; pass --data-dir")?;
    Ok(base
        .join("repo-snapshot")
        .join(compute_path_uuid(repo_root)))
}
