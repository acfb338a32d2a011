//! The repository workspace: every service a tool call needs, wired once.
//!
//! `Workspace` is cheap to clone and is shared by the MCP server and the CLI
//! commands. Blocking work (filesystem, git) goes through
//! [`Workspace::blocking`] so the async executor never stalls.

mod scanner;

pub use scanner::{collect_files, list_dir, EntryKind, WalkEntry};

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, Limits};
use crate::error::{ToolError, ToolResult};
use crate::fingerprint::{FingerprintService, GitProbe, VcsProbe};
use crate::guard::PathGuard;
use crate::lease::LeaseManager;
use crate::snapshot::SnapshotManager;
use crate::store::{BlobStore, SnapshotStore};

struct WorkspaceInner {
    guard: PathGuard,
    fingerprints: FingerprintService,
    leases: LeaseManager,
    snapshots: SnapshotManager,
    limits: Limits,
}

#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

impl Workspace {
    /// Open the workspace described by `config`, probing state through git.
    pub fn open(config: &Config) -> ToolResult<Self> {
        let guard = PathGuard::new(&config.repo_root)?;
        let probe = Arc::new(GitProbe::new(guard.root()));
        Self::with_probe(guard, &config.data_dir, config.limits, probe)
    }

    pub fn with_probe(
        guard: PathGuard,
        data_dir: &Path,
        limits: Limits,
        probe: Arc<dyn VcsProbe>,
    ) -> ToolResult<Self> {
        if data_dir.starts_with(guard.root()) {
            warn!(
                "data directory {} is inside the repository; persisted blobs will change the fingerprint",
                data_dir.display()
            );
        }
        let fingerprints = FingerprintService::new(probe);
        let blobs = BlobStore::open(data_dir)?;
        let records = Arc::new(SnapshotStore::open(data_dir)?);
        let snapshots = SnapshotManager::new(blobs, records, guard.clone(), fingerprints.clone());

        info!(
            "workspace {} (data in {})",
            guard.root().display(),
            data_dir.display()
        );
        Ok(Self {
            inner: Arc::new(WorkspaceInner {
                leases: LeaseManager::new(fingerprints.clone()),
                guard,
                fingerprints,
                snapshots,
                limits,
            }),
        })
    }

    pub fn guard(&self) -> &PathGuard {
        &self.inner.guard
    }

    pub fn fingerprints(&self) -> &FingerprintService {
        &self.inner.fingerprints
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.inner.leases
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.inner.snapshots
    }

    pub fn limits(&self) -> Limits {
        self.inner.limits
    }

    /// Run `f` on the blocking pool. Once started it runs to completion even
    /// if the calling future is dropped.
    pub async fn blocking<T, F>(&self, f: F) -> ToolResult<T>
    where
        F: FnOnce(&Workspace) -> ToolResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let workspace = self.clone();
        tokio::task::spawn_blocking(move || f(&workspace))
            .await
            .map_err(ToolError::from)?
    }
}
