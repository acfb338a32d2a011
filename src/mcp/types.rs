//! MCP tool parameter types.
//!
//! These types are used with rmcp's `Parameters<T>` wrapper for automatic
//! deserialization and JSON schema generation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which view of the repository a call reads or writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The live working tree, validated through a lease
    #[default]
    Worktree,
    /// An immutable, previously captured snapshot
    Snapshot,
}

/// How file content is carried in JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

/// Parameters for lease.acquire
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct LeaseAcquireArgs {
    /// Existing lease to re-validate; omit to issue a new lease
    #[serde(default)]
    pub lease_id: Option<String>,
}

/// Parameters for lease.release
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LeaseReleaseArgs {
    pub lease_id: String,
}

/// Parameters for snapshot.list
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListArgs {
    /// Directory to list, relative to the repository root ("" for the root)
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub lease_id: Option<String>,
    /// Required in snapshot mode
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Maximum entries to return (capped by the server limit)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Entries to skip before the returned page
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Parameters for snapshot.file
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FileArgs {
    /// File path relative to the repository root
    pub path: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub lease_id: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

/// Parameters for snapshot.grep
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GrepArgs {
    /// Regular expression (Rust regex syntax)
    pub pattern: String,
    /// Files or directories to search; the whole repository when empty
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub lease_id: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Stop after this many matching lines (capped by the server limit)
    #[serde(default)]
    pub max_matches: Option<usize>,
}

/// Parameters for snapshot.diff
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DiffArgs {
    #[serde(default)]
    pub mode: Mode,
    /// Target snapshot (snapshot mode)
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Base snapshot; required in worktree mode
    #[serde(default)]
    pub from_snapshot_id: Option<String>,
    /// Limit the diff to this file or directory; the whole repository when omitted
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub lease_id: Option<String>,
}

/// Parameters for snapshot.export
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportArgs {
    pub snapshot_id: String,
    /// Export only files at or below these paths
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Parameters for snapshot.create
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CreateArgs {
    #[serde(default)]
    pub lease_id: Option<String>,
    /// Paths to capture; defaults to every path touched under the lease
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    /// Derive from an existing snapshot instead of the working tree
    #[serde(default)]
    pub from_snapshot_id: Option<String>,
}

/// Parameters for snapshot.info
#[derive(Debug, Deserialize, JsonSchema)]
pub struct InfoArgs {
    pub snapshot_id: String,
}

/// Parameters for snapshot.changes
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChangesArgs {
    pub snapshot_id: String,
    /// Base to compare against; without it every file is reported as added
    #[serde(default)]
    pub from_snapshot_id: Option<String>,
}

/// Parameters for workspace.apply_patch
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ApplyPatchArgs {
    /// Unified diff text
    pub patch: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub lease_id: Option<String>,
    /// Required in snapshot mode
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Leading path components to strip from headers
    #[serde(default)]
    pub strip: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Parameters for workspace.write_file
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: Encoding,
    /// Create missing parent directories
    #[serde(default)]
    pub create_dirs: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub lease_id: Option<String>,
}

/// Parameters for workspace.delete
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteArgs {
    pub path: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub lease_id: Option<String>,
}
