use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::canonical::parse_address;
use crate::error::{ToolError, ToolResult};
use crate::snapshot::{derive_id, Snapshot};

const SNAPSHOTS_DIR: &str = "snapshots";
const TMP_DIR: &str = "tmp";

/// Persisted snapshot records, keyed by snapshot id, fronted by an in-memory cache.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    tmp: PathBuf,
    cache: RwLock<HashMap<String, Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn open(data_dir: &Path) -> ToolResult<Self> {
        let dir = data_dir.join(SNAPSHOTS_DIR);
        let tmp = data_dir.join(TMP_DIR);
        for d in [&dir, &tmp] {
            fs::create_dir_all(d).map_err(|e| ToolError::io(d.display(), e))?;
        }
        Ok(Self {
            dir,
            tmp,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn record_path(&self, hex: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex))
    }

    /// Persist `snapshot` unless a record with the same id already exists,
    /// in which case the existing record is returned unchanged.
    pub fn put(&self, snapshot: Snapshot) -> ToolResult<Arc<Snapshot>> {
        if let Some(existing) = self.get(&snapshot.id)? {
            debug!("snapshot {} already recorded", snapshot.id);
            return Ok(existing);
        }
        let hex = parse_address(&snapshot.id)
            .ok_or_else(|| ToolError::Internal(format!("malformed snapshot id {}", snapshot.id)))?;
        let dest = self.record_path(hex);
        let body = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ToolError::Internal(format!("snapshot encode failed: {}", e)))?;

        let tmp = self.tmp.join(format!("{}.{}.json", hex, Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, &body).and_then(|_| fs::rename(&tmp, &dest)) {
            let _ = fs::remove_file(&tmp);
            return Err(ToolError::io(dest.display(), e));
        }

        let snapshot = Arc::new(snapshot);
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    /// Look a snapshot up by id. A malformed id is `INVALID_ARGUMENT`.
    pub fn get(&self, id: &str) -> ToolResult<Option<Arc<Snapshot>>> {
        let hex = parse_address(id)
            .ok_or_else(|| ToolError::InvalidArgument(format!("malformed snapshot id: {}", id)))?;
        if let Some(hit) = self.cache.read().unwrap_or_else(|e| e.into_inner()).get(id) {
            return Ok(Some(hit.clone()));
        }

        let path = self.record_path(hex);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ToolError::io(path.display(), e)),
        };
        let snapshot: Snapshot = serde_json::from_slice(&body).map_err(|e| {
            ToolError::Internal(format!("corrupt snapshot record {}: {}", path.display(), e))
        })?;
        let derived = derive_id(&snapshot.fingerprint, &snapshot.manifest)?;
        if derived != id || snapshot.id != id {
            return Err(ToolError::Internal(format!(
                "snapshot record {} re-derives to {}",
                id, derived
            )));
        }

        let snapshot = Arc::new(snapshot);
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Look a snapshot up by id, failing with `NOT_FOUND` when absent.
    pub fn require(&self, id: &str) -> ToolResult<Arc<Snapshot>> {
        self.get(id)?
            .ok_or_else(|| ToolError::NotFound(format!("snapshot {}", id)))
    }

    /// Ids of every persisted snapshot, sorted.
    pub fn ids(&self) -> ToolResult<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| ToolError::io(self.dir.display(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ToolError::io(self.dir.display(), e))?;
            let name = entry.file_name();
            if let Some(hex) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                ids.push(format!("sha256:{}", hex));
            }
        }
        ids.sort();
        Ok(ids)
    }
}
