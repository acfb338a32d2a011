//! Patch engine.
//!
//! Patches are unified diffs applied positionally with byte-exact context.
//! Against the live tree a patch is all-or-nothing; against a snapshot each
//! hunk stands alone and the result is a new snapshot.

mod apply;
mod parse;

pub use apply::{Reject, RejectReason};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::canonical::content_address;
use crate::error::{ToolError, ToolResult};
use crate::fingerprint::Fingerprint;
use crate::guard::{PathGuard, RepoPath};
use crate::snapshot::{Snapshot, SnapshotManager};
use apply::apply_file;
use parse::FilePatch;

/// A parsed patch with its targets resolved.
#[derive(Debug, Clone)]
pub struct Patch {
    files: Vec<FilePatch>,
    hash: String,
}

impl Patch {
    /// Parse `text`; `strip` defaults to one component when every header
    /// carries the `a/`/`b/` prefixes.
    pub fn parse(text: &str, strip: Option<usize>) -> ToolResult<Self> {
        let raw = parse::parse(text)?;
        let strip = strip.unwrap_or_else(|| parse::default_strip(&raw));
        let files = parse::resolve(raw, strip)?;
        Ok(Self {
            files,
            hash: content_address(text.as_bytes()),
        })
    }

    /// Content address of the patch text.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Every target path, sorted and deduplicated.
    pub fn paths(&self) -> Vec<RepoPath> {
        let set: BTreeSet<RepoPath> = self.files.iter().map(|f| f.path.clone()).collect();
        set.into_iter().collect()
    }
}

/// Where a patch landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NewState {
    Fingerprint(Fingerprint),
    SnapshotId(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchResult {
    pub applied: bool,
    pub applied_paths: Vec<RepoPath>,
    pub rejects: Vec<Reject>,
    pub new_state: NewState,
}

/// Per-path results of running every section against the current contents.
struct Plan {
    writes: BTreeMap<RepoPath, Option<Vec<u8>>>,
    originals: BTreeMap<RepoPath, Option<Vec<u8>>>,
    rejects: Vec<Reject>,
}

/// Run every section against what `read` returns. Sections whose `key`
/// collides with an earlier one are rejected as `AlreadyModified`.
fn build_plan<F, G, K>(patch: &Patch, mut read: F, key: G) -> ToolResult<Plan>
where
    F: FnMut(&RepoPath) -> ToolResult<Option<Vec<u8>>>,
    G: Fn(&RepoPath) -> K,
    K: Ord,
{
    let mut plan = Plan {
        writes: BTreeMap::new(),
        originals: BTreeMap::new(),
        rejects: Vec::new(),
    };
    let mut claimed = BTreeSet::new();
    for file in &patch.files {
        if !claimed.insert(key(&file.path)) {
            // a second section for the same file
            plan.rejects.extend((0..file.hunks.len()).map(|idx| Reject {
                path: file.path.to_string(),
                hunk_index: idx,
                reason: RejectReason::AlreadyModified,
            }));
            continue;
        }
        let current = read(&file.path)?;
        let outcome = apply_file(file, current.as_deref());
        if outcome.applied_hunks > 0 {
            plan.writes.insert(file.path.clone(), outcome.content);
        }
        plan.originals.insert(file.path.clone(), current);
        plan.rejects.extend(outcome.rejects);
    }
    plan.rejects.sort();
    Ok(plan)
}

/// Outcome of a worktree patch before the fingerprint is re-read.
#[derive(Debug)]
pub struct WorktreeOutcome {
    pub written: bool,
    pub applied_paths: Vec<RepoPath>,
    pub rejects: Vec<Reject>,
}

/// Apply `patch` to the live tree, all or nothing.
///
/// Every target passes the path guard before anything is read. Nothing is
/// written unless every hunk of every section matches; a failed write rolls
/// the files already written back to their original bytes.
pub fn apply_worktree(guard: &PathGuard, patch: &Patch, dry_run: bool) -> ToolResult<WorktreeOutcome> {
    let mut targets = BTreeMap::new();
    for path in patch.paths() {
        let real = guard.resolve_write(&path)?;
        if real.is_dir() {
            return Err(ToolError::InvalidArgument(format!("{} is a directory", path)));
        }
        targets.insert(path, real);
    }

    // a symlink and its target name the same file
    let plan = build_plan(
        patch,
        |path| match fs::read(&targets[path]) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ToolError::io(path, e)),
        },
        |path| targets[path].clone(),
    )?;

    let applied_paths: Vec<RepoPath> = plan.writes.keys().cloned().collect();
    if !plan.rejects.is_empty() {
        info!(
            "patch {} rejected: {} hunk(s) did not match",
            patch.hash(),
            plan.rejects.len()
        );
        return Ok(WorktreeOutcome {
            written: false,
            applied_paths: Vec::new(),
            rejects: plan.rejects,
        });
    }
    if dry_run {
        return Ok(WorktreeOutcome {
            written: false,
            applied_paths,
            rejects: Vec::new(),
        });
    }

    let mut done: Vec<(&RepoPath, Vec<PathBuf>)> = Vec::new();
    for (path, content) in &plan.writes {
        match write_target(&targets[path], content.as_deref()) {
            Ok(created) => done.push((path, created)),
            Err(err) => {
                warn!("patch write to {} failed, rolling back: {}", path, err);
                for (undo, created) in done.iter().rev() {
                    let original = plan.originals.get(*undo).and_then(|o| o.as_deref());
                    if let Err(e) = write_target(&targets[*undo], original) {
                        warn!("rollback of {} failed: {}", undo, e);
                    }
                    remove_dirs(created);
                }
                return Err(ToolError::io(path, err));
            }
        }
    }
    info!("patch {} applied to {} file(s)", patch.hash(), done.len());
    Ok(WorktreeOutcome {
        written: true,
        applied_paths,
        rejects: Vec::new(),
    })
}

/// Replace `real` with `content` via a sibling temp file, or remove it for `None`.
///
/// Returns the directories created to hold the file, outermost first. A
/// failed write removes them again.
pub(crate) fn write_target(real: &Path, content: Option<&[u8]>) -> io::Result<Vec<PathBuf>> {
    let Some(content) = content else {
        return match fs::remove_file(real) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            other => other.map(|_| Vec::new()),
        };
    };
    let parent = real
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
    let created = create_parents(parent)?;
    let name = real.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp: PathBuf = parent.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        if let Ok(meta) = fs::metadata(real) {
            // keep the executable bit so the status report does not see a mode change
            fs::set_permissions(&tmp, meta.permissions())?;
        }
        fs::rename(&tmp, real)
    })();
    match result {
        Ok(()) => Ok(created),
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            remove_dirs(&created);
            Err(err)
        }
    }
}

/// Create `dir` and any missing ancestors, returning only the ones made here.
fn create_parents(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let missing: Vec<&Path> = dir.ancestors().take_while(|d| !d.exists()).collect();
    let mut created = Vec::new();
    for d in missing.into_iter().rev() {
        match fs::create_dir(d) {
            Ok(()) => created.push(d.to_path_buf()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && d.is_dir() => {}
            Err(e) => {
                remove_dirs(&created);
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// Remove directories made by [`create_parents`], innermost first. Ones that
/// gained other entries in the meantime stay.
fn remove_dirs(created: &[PathBuf]) {
    for d in created.iter().rev() {
        let _ = fs::remove_dir(d);
    }
}

/// Apply `patch` to a snapshot. Hunks apply independently; matching ones
/// produce a new snapshot, and the source id is returned when none match.
pub fn apply_snapshot(
    snapshots: &SnapshotManager,
    source: &Arc<Snapshot>,
    patch: &Patch,
    dry_run: bool,
) -> ToolResult<PatchResult> {
    let plan = build_plan(
        patch,
        |path| match source.manifest.get(path.as_str()) {
            Some(entry) => snapshots.blobs().load(&entry.blob_hash).map(Some),
            None => Ok(None),
        },
        RepoPath::clone,
    )?;

    let applied_paths: Vec<RepoPath> = plan.writes.keys().cloned().collect();
    if plan.writes.is_empty() || dry_run {
        debug!("snapshot patch left {} unchanged", source.id);
        return Ok(PatchResult {
            applied: false,
            applied_paths: if dry_run { applied_paths } else { Vec::new() },
            rejects: plan.rejects,
            new_state: NewState::SnapshotId(source.id.clone()),
        });
    }

    let mut changes = BTreeMap::new();
    for (path, content) in &plan.writes {
        let hash = content
            .as_deref()
            .map(|bytes| snapshots.blobs().put(bytes))
            .transpose()?;
        changes.insert(path.to_string(), hash);
    }
    let derived = snapshots.derive(source, &changes, patch.hash().to_string())?;
    Ok(PatchResult {
        applied: true,
        applied_paths,
        rejects: plan.rejects,
        new_state: NewState::SnapshotId(derived.id.clone()),
    })
}
