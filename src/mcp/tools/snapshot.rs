//! Snapshot tools: snapshot.create, snapshot.info, snapshot.changes, snapshot.export.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::common::{load_snapshot, respond, Scope};
use crate::error::{ErrorCode, ToolResult};
use crate::fingerprint::Fingerprint;
use crate::guard::{normalize_all, RepoPath};
use crate::mcp::types::{ChangesArgs, CreateArgs, ExportArgs, InfoArgs};
use crate::snapshot::{changes as manifest_changes, export_tar, Change, ExportSummary, Manifest, ManifestStats};
use crate::workspace::Workspace;

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    snapshot_id: &'a str,
    fingerprint: &'a Fingerprint,
    manifest: &'a Manifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    derived_from: Option<&'a str>,
}

/// Capture a snapshot from the live tree (through a lease) or derive one
/// from an existing snapshot.
pub async fn create(workspace: &Workspace, args: CreateArgs) -> ToolResult<Value> {
    let explicit = args.paths.as_deref().map(normalize_all).transpose()?;

    if let Some(source_id) = args.from_snapshot_id {
        let source = load_snapshot(workspace, source_id).await?;
        let snapshot = workspace
            .blocking(move |ws| ws.snapshots().create_from_snapshot(&source, explicit.as_deref()))
            .await?;
        let body = CreateBody {
            snapshot_id: &snapshot.id,
            fingerprint: &snapshot.fingerprint,
            manifest: &snapshot.manifest,
            derived_from: snapshot.derived_from.as_deref(),
        };
        return respond(&body, Scope::Snapshot);
    }

    // named paths must stay inside the root; touched ones are filtered at capture
    for path in explicit.iter().flatten() {
        match workspace.guard().resolve_read(path) {
            Err(e) if e.code() == ErrorCode::PermissionDenied => return Err(e),
            _ => {}
        }
    }

    let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
    let paths: Vec<RepoPath> = match explicit {
        Some(paths) => {
            lease.touch(paths.iter().cloned());
            paths
        }
        None => lease.touched().iter().cloned().collect(),
    };
    let fingerprint = lease.base_fingerprint().clone();
    let snapshot = workspace
        .blocking(move |ws| ws.snapshots().create_from_worktree(fingerprint, &paths))
        .await?;
    info!(
        "lease {} captured snapshot {} ({} files)",
        lease.id(),
        snapshot.id,
        snapshot.manifest.len()
    );

    let body = CreateBody {
        snapshot_id: &snapshot.id,
        fingerprint: &snapshot.fingerprint,
        manifest: &snapshot.manifest,
        derived_from: None,
    };
    let mut value = respond(&body, Scope::Snapshot)?;
    if let Value::Object(map) = &mut value {
        // outside the cache key, like every lease id
        map.insert("lease_id".to_string(), Value::String(lease.id().to_string()));
    }
    Ok(value)
}

#[derive(Debug, Serialize)]
struct InfoBody {
    snapshot_id: String,
    fingerprint: Fingerprint,
    created_at: DateTime<Utc>,
    derived_from: Option<String>,
    applied_patch_hash: Option<String>,
    manifest_stats: ManifestStats,
}

pub async fn info(workspace: &Workspace, args: InfoArgs) -> ToolResult<Value> {
    let snapshot = load_snapshot(workspace, args.snapshot_id).await?;
    let stats = {
        let snapshot = snapshot.clone();
        workspace
            .blocking(move |ws| ws.snapshots().stats(&snapshot.manifest))
            .await?
    };
    let body = InfoBody {
        snapshot_id: snapshot.id.clone(),
        fingerprint: snapshot.fingerprint.clone(),
        created_at: snapshot.created_at,
        derived_from: snapshot.derived_from.clone(),
        applied_patch_hash: snapshot.applied_patch_hash.clone(),
        manifest_stats: stats,
    };
    respond(&body, Scope::Snapshot)
}

#[derive(Debug, Serialize)]
struct ChangesBody {
    snapshot_id: String,
    from_snapshot_id: Option<String>,
    files_changed: Vec<Change>,
}

pub async fn changes(workspace: &Workspace, args: ChangesArgs) -> ToolResult<Value> {
    let target = load_snapshot(workspace, args.snapshot_id).await?;
    let base = match args.from_snapshot_id {
        Some(id) => Some(load_snapshot(workspace, id).await?),
        None => None,
    };
    let body = ChangesBody {
        snapshot_id: target.id.clone(),
        from_snapshot_id: base.as_ref().map(|b| b.id.clone()),
        files_changed: manifest_changes(base.as_ref().map(|b| &b.manifest), &target.manifest),
    };
    respond(&body, Scope::Snapshot)
}

#[derive(Debug, Serialize)]
struct ExportBody {
    snapshot_id: String,
    format: &'static str,
    bundle: String,
    summary: ExportSummary,
}

/// The archive itself, without the response envelope. Shared with the CLI.
pub fn export_archive(
    workspace: &Workspace,
    snapshot_id: &str,
    paths: &[RepoPath],
) -> ToolResult<(Vec<u8>, ExportSummary)> {
    let snapshot = workspace.snapshots().get(snapshot_id)?;
    let manifest = if paths.is_empty() {
        snapshot.manifest.clone()
    } else {
        snapshot.manifest.subset(paths)
    };
    export_tar(
        workspace.snapshots().blobs(),
        &manifest,
        workspace.limits().max_export_bytes,
    )
}

pub async fn export(workspace: &Workspace, args: ExportArgs) -> ToolResult<Value> {
    let paths = normalize_all(&args.paths)?;
    let snapshot_id = args.snapshot_id;
    let body = workspace
        .blocking(move |ws| {
            let (bytes, summary) = export_archive(ws, &snapshot_id, &paths)?;
            Ok(ExportBody {
                snapshot_id,
                format: "tar",
                bundle: format!("base64:{}", STANDARD.encode(bytes)),
                summary,
            })
        })
        .await?;
    respond(&body, Scope::Snapshot)
}
