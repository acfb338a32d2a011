//! Working-tree traversal.
//!
//! Uses `ignore::WalkBuilder` so `.gitignore` and `.git/info/exclude` are
//! honoured at every level. The user's global excludes file is not consulted:
//! two machines looking at the same repository must see the same tree.

use ignore::{DirEntry, WalkBuilder};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ToolError, ToolResult};
use crate::guard::{PathGuard, RepoPath};

const VCS_DIR: &str = ".git";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkEntry {
    pub path: RepoPath,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

fn build_walker(start: &Path, max_depth: Option<usize>) -> WalkBuilder {
    let mut builder = WalkBuilder::new(start);

    builder.hidden(false);
    builder.ignore(false);
    builder.git_ignore(true);
    builder.git_global(false);
    builder.git_exclude(true);
    builder.parents(true);
    builder.follow_links(false);
    builder.max_depth(max_depth);
    builder.sort_by_file_name(|a, b| a.cmp(b));
    builder.filter_entry(|entry| entry.file_name() != VCS_DIR);

    builder
}

fn entry_kind(entry: &DirEntry) -> Option<EntryKind> {
    let file_type = entry.file_type()?;
    Some(if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    })
}

/// Path of `entry` below the walk start, expressed under `base`.
fn relative(base: &RepoPath, start: &Path, entry: &DirEntry) -> Option<RepoPath> {
    let rel = entry.path().strip_prefix(start).ok()?;
    let mut path = base.clone();
    for component in rel.components() {
        path = path.join(component.as_os_str().to_str()?);
    }
    Some(path)
}

/// Immediate children of the directory `dir`, sorted by path.
pub fn list_dir(guard: &PathGuard, dir: &RepoPath) -> ToolResult<Vec<WalkEntry>> {
    let start = guard.resolve_read(dir)?;
    let meta = fs::metadata(&start).map_err(|e| ToolError::io(dir, e))?;
    if !meta.is_dir() {
        return Err(ToolError::InvalidArgument(format!("{} is not a directory", dir)));
    }

    let mut entries = Vec::new();
    for result in build_walker(&start, Some(1)).build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry under {}: {}", dir, e);
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let (Some(path), Some(kind)) = (relative(dir, &start, &entry), entry_kind(&entry)) else {
            debug!("skipping non UTF-8 entry {}", entry.path().display());
            continue;
        };
        let size = match kind {
            EntryKind::File => entry.metadata().ok().map(|m| m.len()),
            _ => None,
        };
        entries.push(WalkEntry { path, kind, size });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Every regular file at or below each of `roots`, sorted and deduplicated.
///
/// A root naming a file yields that file even when it is ignored; symlinks
/// met during the walk are not followed and not returned.
pub fn collect_files(guard: &PathGuard, roots: &[RepoPath]) -> ToolResult<Vec<RepoPath>> {
    let mut files = Vec::new();
    for root in roots {
        let start = guard.resolve_read(root)?;
        let meta = fs::metadata(&start).map_err(|e| ToolError::io(root, e))?;
        if meta.is_file() {
            files.push(root.clone());
            continue;
        }
        for result in build_walker(&start, None).build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry under {}: {}", root, e);
                    continue;
                }
            };
            if entry.file_type().is_some_and(|t| t.is_file()) {
                if let Some(path) = relative(root, &start, &entry) {
                    files.push(path);
                }
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
