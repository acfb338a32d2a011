use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::canonical::{content_address, hex_digest, parse_address, HASH_PREFIX};
use crate::error::{ToolError, ToolResult};

const BLOBS_DIR: &str = "blobs/sha256";
const TMP_DIR: &str = "tmp";

/// Content-addressed file storage under `<data_dir>/blobs/sha256/xx/yyyy...`.
///
/// Blobs are written once through a temp file and a rename, and every read
/// re-hashes the bytes before handing them out.
#[derive(Debug, Clone)]
pub struct BlobStore {
    objects: PathBuf,
    tmp: PathBuf,
}

/// Outcome of a full store scan.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked: usize,
    pub corrupt: Vec<String>,
}

impl BlobStore {
    pub fn open(data_dir: &Path) -> ToolResult<Self> {
        let store = Self {
            objects: data_dir.join(BLOBS_DIR),
            tmp: data_dir.join(TMP_DIR),
        };
        for dir in [&store.objects, &store.tmp] {
            fs::create_dir_all(dir).map_err(|e| ToolError::io(dir.display(), e))?;
        }
        Ok(store)
    }

    fn object_path(&self, hex: &str) -> PathBuf {
        self.objects.join(&hex[..2]).join(&hex[2..])
    }

    fn locate(&self, hash: &str) -> ToolResult<PathBuf> {
        let hex = parse_address(hash)
            .ok_or_else(|| ToolError::InvalidArgument(format!("malformed blob hash: {}", hash)))?;
        Ok(self.object_path(hex))
    }

    /// Store `bytes`, returning their address. Storing existing content is a no-op.
    pub fn put(&self, bytes: &[u8]) -> ToolResult<String> {
        let hex = hex_digest(bytes);
        let dest = self.object_path(&hex);
        let address = format!("{}{}", HASH_PREFIX, hex);
        if dest.exists() {
            debug!("blob hit {}", &hex[..12]);
            return Ok(address);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ToolError::io(parent.display(), e))?;
        }
        let tmp = self.tmp.join(format!("{}.{}", hex, Uuid::new_v4()));
        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &dest));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(ToolError::io(dest.display(), e));
        }
        debug!("blob stored {} ({} bytes)", &hex[..12], bytes.len());
        Ok(address)
    }

    /// Load a blob, verifying its digest. `Ok(None)` when it is not stored.
    pub fn get(&self, hash: &str) -> ToolResult<Option<Vec<u8>>> {
        let path = self.locate(hash)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ToolError::io(path.display(), e)),
        };
        let actual = content_address(&bytes);
        if actual != hash {
            return Err(ToolError::Internal(format!(
                "blob digest mismatch: expected {}, found {}",
                hash, actual
            )));
        }
        Ok(Some(bytes))
    }

    /// Load a blob a manifest refers to. A missing blob is a store defect.
    pub fn load(&self, hash: &str) -> ToolResult<Vec<u8>> {
        self.get(hash)?
            .ok_or_else(|| ToolError::Internal(format!("blob {} missing from store", hash)))
    }

    pub fn size(&self, hash: &str) -> ToolResult<Option<u64>> {
        let path = self.locate(hash)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ToolError::io(path.display(), e)),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.locate(hash).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Re-hash every stored blob.
    pub fn verify_all(&self) -> ToolResult<VerifyReport> {
        let mut report = VerifyReport::default();
        for entry in WalkDir::new(&self.objects).sort_by_file_name() {
            let entry = entry.map_err(|e| ToolError::Internal(format!("blob walk failed: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let expected = match (
                path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()),
                path.file_name().and_then(|n| n.to_str()),
            ) {
                (Some(prefix), Some(rest)) => format!("{}{}", prefix, rest),
                _ => continue,
            };
            report.checked += 1;
            let bytes = fs::read(path).map_err(|e| ToolError::io(path.display(), e))?;
            if hex_digest(&bytes) != expected {
                warn!("corrupt blob at {}", path.display());
                report.corrupt.push(format!("{}{}", HASH_PREFIX, expected));
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    #[test]
    fn put_then_get_verifies_content() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let hash = store.put(b"hello\n").unwrap();
        assert_eq!(hash, content_address(b"hello\n"));
        assert_eq!(store.get(&hash).unwrap().unwrap(), b"hello\n");
        assert_eq!(store.size(&hash).unwrap(), Some(6));
        assert!(store.contains(&hash));
    }

    #[test]
    fn duplicate_put_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let first = store.put(b"same").unwrap();
        let second = store.put(b"same").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.verify_all().unwrap().checked, 1);
    }

    #[test]
    fn missing_blob_is_none() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let absent = content_address(b"never stored");
        assert!(store.get(&absent).unwrap().is_none());
        assert_eq!(store.load(&absent).unwrap_err().code(), ErrorCode::Internal);
        assert_eq!(
            store.get("sha256:zz").unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn tampered_blob_is_detected() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let hash = store.put(b"original").unwrap();
        let hex = parse_address(&hash).unwrap();
        fs::write(store.object_path(hex), b"tampered").unwrap();

        assert_eq!(store.get(&hash).unwrap_err().code(), ErrorCode::Internal);
        let report = store.verify_all().unwrap();
        assert_eq!(report.corrupt, vec![hash]);
    }
}
