//! Lease registry.
//!
//! A lease binds a sequence of worktree calls to the fingerprint they
//! started from. Each lease sits behind its own async mutex and a call
//! holds that mutex for its whole duration, so calls on one lease are
//! serialized while calls on different leases run independently.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ToolError, ToolResult};
use crate::fingerprint::{Fingerprint, FingerprintService};
use crate::guard::RepoPath;

#[derive(Debug)]
struct LeaseState {
    id: String,
    base: Fingerprint,
    touched: BTreeSet<RepoPath>,
    created_at: DateTime<Utc>,
    last_used: Instant,
    valid: bool,
}

type LeaseCell = Arc<AsyncMutex<LeaseState>>;

/// Most leases the registry holds; the least recently used idle one goes first.
const MAX_LEASES: usize = 1024;
/// Leases unused for this long are collected when a new lease is issued.
const LEASE_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

pub struct LeaseManager {
    fingerprints: FingerprintService,
    leases: Mutex<HashMap<String, LeaseCell>>,
    capacity: usize,
    idle_ttl: Duration,
}

/// Exclusive handle on a validated lease for the duration of one call.
pub struct LeaseGuard {
    state: OwnedMutexGuard<LeaseState>,
}

impl LeaseGuard {
    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn base_fingerprint(&self) -> &Fingerprint {
        &self.state.base
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.created_at
    }

    pub fn touched(&self) -> &BTreeSet<RepoPath> {
        &self.state.touched
    }

    /// Record paths accessed under this lease.
    pub fn touch<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = RepoPath>,
    {
        self.state
            .touched
            .extend(paths.into_iter().filter(|p| !p.is_root()));
    }

    /// Record a path plus every directory above it.
    pub fn touch_with_parents(&mut self, path: &RepoPath) {
        let ancestors = path.ancestors();
        self.touch(std::iter::once(path.clone()).chain(ancestors));
    }

    /// Adopt the fingerprint produced by a successful mutation as the new base.
    pub fn rotate(&mut self, fingerprint: Fingerprint) {
        debug!("lease {} rotated to new base", self.state.id);
        self.state.base = fingerprint;
    }
}

impl LeaseManager {
    pub fn new(fingerprints: FingerprintService) -> Self {
        Self::with_bounds(fingerprints, MAX_LEASES, LEASE_IDLE_TTL)
    }

    pub fn with_bounds(fingerprints: FingerprintService, capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            fingerprints,
            leases: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            idle_ttl,
        }
    }

    pub fn fingerprints(&self) -> &FingerprintService {
        &self.fingerprints
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, LeaseCell>> {
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issue a fresh lease (no id) or re-validate an existing one.
    pub async fn acquire(&self, lease_id: Option<&str>) -> ToolResult<LeaseGuard> {
        let Some(id) = lease_id else {
            return self.issue().await;
        };

        let cell = self.registry().get(id).cloned();
        let Some(cell) = cell else {
            let current = self.fingerprints.compute().await?;
            debug!("unknown lease {}", id);
            return Err(ToolError::StaleLease {
                lease_id: id.to_string(),
                base: None,
                current,
            });
        };

        let mut state = cell.lock_owned().await;
        if !state.valid {
            self.registry().remove(id);
            let current = self.fingerprints.compute().await?;
            info!("collected invalidated lease {}", id);
            return Err(ToolError::StaleLease {
                lease_id: id.to_string(),
                base: Some(state.base.clone()),
                current,
            });
        }

        let current = self.fingerprints.compute().await?;
        if current != state.base {
            state.valid = false;
            warn!("lease {} is stale: repository changed since its base", id);
            return Err(ToolError::StaleLease {
                lease_id: id.to_string(),
                base: Some(state.base.clone()),
                current,
            });
        }
        state.last_used = Instant::now();
        Ok(LeaseGuard { state })
    }

    async fn issue(&self) -> ToolResult<LeaseGuard> {
        let base = self.fingerprints.compute().await?;
        let id = Uuid::new_v4().to_string();
        let cell = Arc::new(AsyncMutex::new(LeaseState {
            id: id.clone(),
            base: base.clone(),
            touched: BTreeSet::new(),
            created_at: Utc::now(),
            last_used: Instant::now(),
            valid: true,
        }));
        // locked before it is published, so no other call can observe it half-used
        let state = cell.clone().lock_owned().await;

        let mut registry = self.registry();
        self.collect(&mut registry, &base);
        registry.insert(id.clone(), cell);
        info!("issued lease {} ({} active)", id, registry.len());
        drop(registry);

        Ok(LeaseGuard { state })
    }

    /// Drop invalidated and idle leases, mark leases whose base no longer
    /// matches `current` invalid (they answer one more `STALE_LEASE`), then
    /// evict the least recently used until there is room for one more.
    /// Leases held by an in-flight call are never touched.
    fn collect(&self, registry: &mut HashMap<String, LeaseCell>, current: &Fingerprint) {
        let now = Instant::now();
        registry.retain(|id, cell| {
            let Ok(mut state) = cell.try_lock() else {
                return true;
            };
            if !state.valid {
                return false;
            }
            if now.duration_since(state.last_used) >= self.idle_ttl {
                debug!("expired idle lease {}", id);
                return false;
            }
            if &state.base != current {
                debug!("lease {} no longer matches the repository", id);
                state.valid = false;
            }
            true
        });

        while registry.len() >= self.capacity {
            let oldest = registry
                .iter()
                .filter_map(|(id, cell)| cell.try_lock().ok().map(|s| (s.last_used, id.clone())))
                .min();
            let Some((_, id)) = oldest else {
                break;
            };
            registry.remove(&id);
            debug!("evicted lease {} (registry full)", id);
        }
    }

    /// Drop a lease. Returns whether it existed; releasing twice is harmless.
    pub fn release(&self, lease_id: &str) -> bool {
        let removed = self.registry().remove(lease_id).is_some();
        if removed {
            info!("released lease {}", lease_id);
        }
        removed
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.registry().len()
    }
}
