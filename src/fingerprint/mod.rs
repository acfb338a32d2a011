//! Repository state fingerprints.
//!
//! A fingerprint is the triple (committed tree, staged tree, working-tree
//! status digest). Two fingerprints compare equal iff all three parts do,
//! so an untracked file appearing is enough to move it.

mod git;

pub use git::GitProbe;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::canonical::hex_digest;
use crate::error::{ToolError, ToolResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Committed tree id, empty when the repository has no commits.
    pub head_oid: String,
    /// Tree id built from the index, empty when no tree can be built.
    pub index_oid: String,
    /// Hex SHA-256 of the raw working-tree status report.
    pub status_hash: String,
}

/// The three read-only version-control queries a fingerprint needs.
pub trait VcsProbe: Send + Sync {
    fn head_tree(&self) -> ToolResult<Option<String>>;
    fn index_tree(&self) -> ToolResult<Option<String>>;
    fn status_bytes(&self) -> ToolResult<Vec<u8>>;
}

#[derive(Clone)]
pub struct FingerprintService {
    probe: Arc<dyn VcsProbe>,
}

impl FingerprintService {
    pub fn new(probe: Arc<dyn VcsProbe>) -> Self {
        Self { probe }
    }

    /// Compute the live fingerprint on the calling thread.
    pub fn compute_blocking(&self) -> ToolResult<Fingerprint> {
        let head_oid = self.probe.head_tree()?.unwrap_or_default();
        let index_oid = self.probe.index_tree()?.unwrap_or_default();
        let status = self.probe.status_bytes()?;
        let fingerprint = Fingerprint {
            head_oid,
            index_oid,
            status_hash: hex_digest(&status),
        };
        debug!(
            "fingerprint head={} index={} status={}",
            short(&fingerprint.head_oid),
            short(&fingerprint.index_oid),
            short(&fingerprint.status_hash)
        );
        Ok(fingerprint)
    }

    /// Compute the live fingerprint off the async executor.
    pub async fn compute(&self) -> ToolResult<Fingerprint> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.compute_blocking())
            .await
            .map_err(ToolError::from)?
    }
}

fn short(oid: &str) -> &str {
    oid.get(..12).unwrap_or(oid)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory probe whose answers tests can change between calls.
    #[derive(Default)]
    pub struct ScriptedProbe {
        pub head: Mutex<Option<String>>,
        pub index: Mutex<Option<String>>,
        pub status: Mutex<Vec<u8>>,
    }

    impl ScriptedProbe {
        pub fn set_status(&self, status: &[u8]) {
            *self.status.lock().unwrap() = status.to_vec();
        }

        pub fn set_head(&self, head: Option<&str>) {
            *self.head.lock().unwrap() = head.map(str::to_string);
        }
    }

    impl VcsProbe for ScriptedProbe {
        fn head_tree(&self) -> ToolResult<Option<String>> {
            Ok(self.head.lock().unwrap().clone())
        }

        fn index_tree(&self) -> ToolResult<Option<String>> {
            Ok(self.index.lock().unwrap().clone())
        }

        fn status_bytes(&self) -> ToolResult<Vec<u8>> {
            Ok(self.status.lock().unwrap().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProbe;
    use super::*;

    #[test]
    fn unborn_repository_has_empty_oids() {
        let probe = Arc::new(ScriptedProbe::default());
        let service = FingerprintService::new(probe);
        let fp = service.compute_blocking().unwrap();
        assert_eq!(fp.head_oid, "");
        assert_eq!(fp.index_oid, "");
        assert_eq!(fp.status_hash, hex_digest(b""));
    }

    #[tokio::test]
    async fn repeated_compute_is_stable() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.set_head(Some("4b825dc642cb6eb9a060e54bf8d69288fbee4904"));
        probe.set_status(b"?? new.txt\0");
        let service = FingerprintService::new(probe);

        let first = service.compute().await.unwrap();
        let second = service.compute().await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn status_change_alone_moves_the_fingerprint() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.set_head(Some("abc"));
        let service = FingerprintService::new(probe.clone());
        let before = service.compute_blocking().unwrap();

        probe.set_status(b"?? untracked.txt\0");
        let after = service.compute_blocking().unwrap();

        assert_eq!(before.head_oid, after.head_oid);
        assert_eq!(before.index_oid, after.index_oid);
        assert_ne!(before, after);
    }
}
