//! Snapshot capture and resolution.
//!
//! A snapshot is a manifest plus the fingerprint it was captured from. Its
//! id is derived from exactly those two values, so capturing identical
//! content from an identical repository state always yields the same id.

mod archive;
mod manifest;

pub use archive::{export_tar, ExportSummary};
pub use manifest::{Manifest, ManifestEntry, Node};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::canonical::{content_address, to_canonical_bytes};
use crate::error::{ErrorCode, ToolError, ToolResult};
use crate::fingerprint::{Fingerprint, FingerprintService};
use crate::guard::{PathGuard, RepoPath};
use crate::store::{BlobStore, SnapshotStore};

/// `sha256( canonical(fingerprint) "\n" canonical(manifest) )`.
pub fn derive_id(fingerprint: &Fingerprint, manifest: &Manifest) -> ToolResult<String> {
    let mut bytes = to_canonical_bytes(fingerprint)?;
    bytes.push(b'\n');
    bytes.extend(to_canonical_bytes(manifest)?);
    Ok(content_address(&bytes))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub fingerprint: Fingerprint,
    pub manifest: Manifest,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_patch_hash: Option<String>,
}

impl Snapshot {
    pub fn new(
        fingerprint: Fingerprint,
        manifest: Manifest,
        derived_from: Option<String>,
        applied_patch_hash: Option<String>,
    ) -> ToolResult<Self> {
        let id = derive_id(&fingerprint, &manifest)?;
        Ok(Self {
            id,
            fingerprint,
            manifest,
            created_at: Utc::now(),
            derived_from,
            applied_patch_hash,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
}

/// Path-level differences between two manifests, sorted by path.
/// Without a base every entry of `to` is an addition. Renames show up as
/// a deletion plus an addition.
pub fn changes(from: Option<&Manifest>, to: &Manifest) -> Vec<Change> {
    let empty = Manifest::default();
    let from = from.unwrap_or(&empty);
    let mut old = from.entries().iter().peekable();
    let mut new = to.entries().iter().peekable();
    let mut out = Vec::new();

    loop {
        let change = match (old.peek(), new.peek()) {
            (None, None) => break,
            (Some(o), None) => {
                let c = (o.path.clone(), ChangeKind::Deleted);
                old.next();
                c
            }
            (None, Some(n)) => {
                let c = (n.path.clone(), ChangeKind::Added);
                new.next();
                c
            }
            (Some(o), Some(n)) => match o.path.cmp(&n.path) {
                std::cmp::Ordering::Less => {
                    let c = (o.path.clone(), ChangeKind::Deleted);
                    old.next();
                    c
                }
                std::cmp::Ordering::Greater => {
                    let c = (n.path.clone(), ChangeKind::Added);
                    new.next();
                    c
                }
                std::cmp::Ordering::Equal => {
                    let modified = o.blob_hash != n.blob_hash;
                    let path = n.path.clone();
                    old.next();
                    new.next();
                    if !modified {
                        continue;
                    }
                    (path, ChangeKind::Modified)
                }
            },
        };
        out.push(Change {
            path: change.0,
            kind: change.1,
        });
    }
    out
}

/// Totals over a manifest's blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManifestStats {
    pub files: usize,
    pub bytes: u64,
}

/// Builds, persists and reads snapshots. Every method here blocks on
/// filesystem I/O; async callers go through `spawn_blocking`.
#[derive(Clone)]
pub struct SnapshotManager {
    blobs: BlobStore,
    records: Arc<SnapshotStore>,
    guard: PathGuard,
    fingerprints: FingerprintService,
}

impl SnapshotManager {
    pub fn new(
        blobs: BlobStore,
        records: Arc<SnapshotStore>,
        guard: PathGuard,
        fingerprints: FingerprintService,
    ) -> Self {
        Self {
            blobs,
            records,
            guard,
            fingerprints,
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn get(&self, id: &str) -> ToolResult<Arc<Snapshot>> {
        self.records.require(id)
    }

    /// Capture the live bytes of `paths` under `fingerprint`.
    ///
    /// Only regular files are captured. Directories, symlinks, vanished
    /// paths and paths that resolve outside the root are skipped. Fails with
    /// `REPO_CHANGED` when the repository moved while the files were being read.
    pub fn create_from_worktree(
        &self,
        fingerprint: Fingerprint,
        paths: &[RepoPath],
    ) -> ToolResult<Arc<Snapshot>> {
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths.iter().filter(|p| !p.is_root()) {
            match fs::symlink_metadata(self.guard.join(path)) {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => {
                    debug!("skipping non-regular path {}", path);
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("skipping vanished path {}", path);
                    continue;
                }
                Err(e) => return Err(ToolError::io(path, e)),
            }
            let real = match self.guard.resolve_read(path) {
                Ok(real) => real,
                Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::PermissionDenied) => {
                    debug!("skipping {}: {}", path, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let bytes = fs::read(&real).map_err(|e| ToolError::io(path, e))?;
            let blob_hash = self.blobs.put(&bytes)?;
            entries.push(ManifestEntry::new(path.as_str(), blob_hash));
        }

        let after = self.fingerprints.compute_blocking()?;
        if after != fingerprint {
            warn!("repository changed while capturing {} paths", paths.len());
            return Err(ToolError::RepoChanged {
                operation: "snapshot.create",
                before: fingerprint,
                after,
            });
        }

        let snapshot = Snapshot::new(fingerprint, Manifest::new(entries), None, None)?;
        let snapshot = self.records.put(snapshot)?;
        info!(
            "snapshot {} captured ({} files)",
            snapshot.id,
            snapshot.manifest.len()
        );
        Ok(snapshot)
    }

    /// New snapshot holding the subset of `source` at or below `paths`
    /// (all of it when `paths` is `None`), under the same fingerprint.
    pub fn create_from_snapshot(
        &self,
        source: &Snapshot,
        paths: Option<&[RepoPath]>,
    ) -> ToolResult<Arc<Snapshot>> {
        let manifest = match paths {
            Some(paths) => source.manifest.subset(paths),
            None => source.manifest.clone(),
        };
        let snapshot = Snapshot::new(
            source.fingerprint.clone(),
            manifest,
            Some(source.id.clone()),
            None,
        )?;
        if snapshot.id == source.id {
            return self.records.require(&source.id);
        }
        let snapshot = self.records.put(snapshot)?;
        info!("snapshot {} derived from {}", snapshot.id, source.id);
        Ok(snapshot)
    }

    /// Apply path-level `changes` to `source` as the product of a patch.
    pub fn derive(
        &self,
        source: &Snapshot,
        changes: &BTreeMap<String, Option<String>>,
        patch_hash: String,
    ) -> ToolResult<Arc<Snapshot>> {
        let manifest = source.manifest.with_changes(changes);
        let snapshot = Snapshot::new(
            source.fingerprint.clone(),
            manifest,
            Some(source.id.clone()),
            Some(patch_hash),
        )?;
        if snapshot.id == source.id {
            return self.records.require(&source.id);
        }
        let snapshot = self.records.put(snapshot)?;
        info!(
            "snapshot {} derived from {} by patch",
            snapshot.id, source.id
        );
        Ok(snapshot)
    }

    /// Strict file lookup: only captured files resolve.
    pub fn resolve(&self, snapshot: &Snapshot, path: &RepoPath) -> ToolResult<(ManifestEntry, Vec<u8>)> {
        let entry = match snapshot.manifest.get(path.as_str()) {
            Some(entry) => entry.clone(),
            None if snapshot.manifest.is_dir(path.as_str()) => {
                return Err(ToolError::InvalidArgument(format!("{} is a directory", path)))
            }
            None => {
                return Err(ToolError::NotFound(format!(
                    "{} is not captured in {}",
                    path, snapshot.id
                )))
            }
        };
        let bytes = self.blobs.load(&entry.blob_hash)?;
        Ok((entry, bytes))
    }

    pub fn stats(&self, manifest: &Manifest) -> ToolResult<ManifestStats> {
        let mut stats = ManifestStats::default();
        for entry in manifest.entries() {
            stats.files += 1;
            stats.bytes += self.blobs.size(&entry.blob_hash)?.ok_or_else(|| {
                ToolError::Internal(format!("blob {} missing from store", entry.blob_hash))
            })?;
        }
        Ok(stats)
    }
}
