//! Mutating tools: workspace.apply_patch, workspace.write_file, workspace.delete.
//!
//! Targets pass the path guard before the lease is validated. A successful
//! worktree write re-reads the fingerprint and rotates the lease onto it.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io;
use tracing::info;

use super::common::{decode_content, require_snapshot, respond, worktree_only, Scope};
use crate::canonical::content_address;
use crate::error::{ToolError, ToolResult};
use crate::guard::{normalize, RepoPath};
use crate::lease::LeaseGuard;
use crate::mcp::types::{ApplyPatchArgs, DeleteArgs, Mode, WriteFileArgs};
use crate::patch::{apply_snapshot, apply_worktree, write_target, NewState, Patch, PatchResult};
use crate::workspace::Workspace;

/// Adopt the post-write fingerprint and record the written paths.
async fn settle(workspace: &Workspace, lease: &mut LeaseGuard, written: &[RepoPath]) -> ToolResult<()> {
    let fingerprint = workspace.fingerprints().compute().await?;
    lease.rotate(fingerprint);
    lease.touch(written.iter().cloned());
    Ok(())
}

pub async fn apply_patch(workspace: &Workspace, args: ApplyPatchArgs) -> ToolResult<Value> {
    let patch = Patch::parse(&args.patch, args.strip)?;
    let dry_run = args.dry_run;

    match args.mode {
        Mode::Snapshot => {
            let source = require_snapshot(workspace, args.snapshot_id).await?;
            let result = workspace
                .blocking(move |ws| apply_snapshot(ws.snapshots(), &source, &patch, dry_run))
                .await?;
            respond(&result, Scope::Snapshot)
        }
        Mode::Worktree => {
            worktree_only(&args.snapshot_id)?;
            for path in patch.paths() {
                workspace.guard().resolve_write(&path)?;
            }
            let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
            let hash = patch.hash().to_string();
            let outcome = workspace
                .blocking(move |ws| apply_worktree(ws.guard(), &patch, dry_run))
                .await?;
            if outcome.written {
                settle(workspace, &mut lease, &outcome.applied_paths).await?;
                info!(
                    "lease {} applied patch {} ({} files)",
                    lease.id(),
                    hash,
                    outcome.applied_paths.len()
                );
            }
            let result = PatchResult {
                applied: outcome.written,
                applied_paths: outcome.applied_paths,
                rejects: outcome.rejects,
                new_state: NewState::Fingerprint(lease.base_fingerprint().clone()),
            };
            respond(&result, Scope::Worktree(&lease))
        }
    }
}

#[derive(Debug, Serialize)]
struct WriteBody {
    path: RepoPath,
    bytes_written: u64,
    blob_hash: String,
    created: bool,
    dry_run: bool,
}

pub async fn write_file(workspace: &Workspace, args: WriteFileArgs) -> ToolResult<Value> {
    let path = normalize(&args.path)?;
    let real = workspace.guard().resolve_write(&path)?;
    let content = decode_content(&args.content, args.encoding)?;
    let limit = workspace.limits().max_file_bytes;
    if content.len() as u64 > limit {
        return Err(ToolError::TooLarge {
            what: path.to_string(),
            size: content.len() as u64,
            limit,
        });
    }

    let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
    let (create_dirs, dry_run) = (args.create_dirs, args.dry_run);
    let blob_hash = content_address(&content);
    let size = content.len() as u64;
    let created = {
        let path = path.clone();
        workspace
            .blocking(move |_| {
                let created = match fs::symlink_metadata(&real) {
                    Ok(meta) if meta.is_dir() => {
                        return Err(ToolError::InvalidArgument(format!("{} is a directory", path)))
                    }
                    Ok(_) => false,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => true,
                    Err(e) => return Err(ToolError::io(&path, e)),
                };
                let parent_exists = real.parent().is_some_and(|p| p.is_dir());
                if !parent_exists && !create_dirs {
                    return Err(ToolError::NotFound(format!(
                        "parent directory of {} does not exist (set create_dirs)",
                        path
                    )));
                }
                if !dry_run {
                    write_target(&real, Some(content.as_slice())).map_err(|e| ToolError::io(&path, e))?;
                }
                Ok(created)
            })
            .await?
    };

    if !dry_run {
        settle(workspace, &mut lease, std::slice::from_ref(&path)).await?;
        info!("lease {} wrote {} ({} bytes)", lease.id(), path, size);
    }
    let body = WriteBody {
        path,
        bytes_written: if dry_run { 0 } else { size },
        blob_hash,
        created,
        dry_run,
    };
    respond(&body, Scope::Worktree(&lease))
}

#[derive(Debug, Serialize)]
struct DeleteBody {
    path: RepoPath,
    deleted: bool,
    dry_run: bool,
}

pub async fn delete(workspace: &Workspace, args: DeleteArgs) -> ToolResult<Value> {
    let path = normalize(&args.path)?;
    workspace.guard().resolve_write(&path)?;

    let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
    let dry_run = args.dry_run;
    {
        let path = path.clone();
        workspace
            .blocking(move |ws| {
                // the link itself is removed, never what it points at
                let target = ws.guard().join(&path);
                let meta = fs::symlink_metadata(&target).map_err(|e| ToolError::io(&path, e))?;
                if meta.is_dir() {
                    return Err(ToolError::InvalidArgument(format!(
                        "{} is a directory; only files can be deleted",
                        path
                    )));
                }
                if !dry_run {
                    fs::remove_file(&target).map_err(|e| ToolError::io(&path, e))?;
                }
                Ok(())
            })
            .await?;
    }

    if !dry_run {
        settle(workspace, &mut lease, std::slice::from_ref(&path)).await?;
        info!("lease {} deleted {}", lease.id(), path);
    }
    let body = DeleteBody {
        path,
        deleted: !dry_run,
        dry_run,
    };
    respond(&body, Scope::Worktree(&lease))
}
