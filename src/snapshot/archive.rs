//! Deterministic tar export of captured files.

use serde::Serialize;
use std::path::Path;
use tar::{Builder, EntryType, Header};

use super::{Manifest, ManifestEntry};
use crate::error::{ToolError, ToolResult};
use crate::store::BlobStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub included_files: usize,
    pub included_bytes: u64,
}

fn archive_error(err: std::io::Error) -> ToolError {
    ToolError::Internal(format!("building archive: {}", err))
}

/// Tar the manifest's files in path order. Every header carries mtime 0,
/// uid/gid 0 and mode 0644, so the same manifest always yields the same bytes.
/// Fails with `TOO_LARGE` before reading any blob when the payload would
/// exceed `limit`.
pub fn export_tar(
    blobs: &BlobStore,
    manifest: &Manifest,
    limit: u64,
) -> ToolResult<(Vec<u8>, ExportSummary)> {
    let mut summary = ExportSummary::default();
    for entry in manifest.entries() {
        summary.included_files += 1;
        summary.included_bytes += blobs.size(&entry.blob_hash)?.ok_or_else(|| {
            ToolError::Internal(format!("blob {} missing from store", entry.blob_hash))
        })?;
    }
    if summary.included_bytes > limit {
        return Err(ToolError::TooLarge {
            what: "export".to_string(),
            size: summary.included_bytes,
            limit,
        });
    }

    let mut builder = Builder::new(Vec::new());
    for entry in manifest.entries() {
        append(&mut builder, blobs, entry)?;
    }
    let bytes = builder.into_inner().map_err(archive_error)?;
    Ok((bytes, summary))
}

fn append(builder: &mut Builder<Vec<u8>>, blobs: &BlobStore, entry: &ManifestEntry) -> ToolResult<()> {
    let bytes = blobs.load(&entry.blob_hash)?;
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(bytes.len() as u64);
    builder
        .append_data(&mut header, Path::new(&entry.path), bytes.as_slice())
        .map_err(archive_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Read;
    use tempfile::TempDir;

    fn store_with(files: &[(&str, &[u8])]) -> (TempDir, BlobStore, Manifest) {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::open(dir.path()).unwrap();
        let entries = files
            .iter()
            .map(|(path, bytes)| ManifestEntry::new(*path, blobs.put(bytes).unwrap()))
            .collect();
        (dir, blobs, Manifest::new(entries))
    }

    #[test]
    fn archive_is_sorted_and_reproducible() {
        let (_dir, blobs, manifest) = store_with(&[("z.txt", b"zz"), ("a/b.txt", b"b")]);
        let (first, summary) = export_tar(&blobs, &manifest, 1024).unwrap();
        let (second, _) = export_tar(&blobs, &manifest, 1024).unwrap();
        assert_eq!(first, second);
        assert_eq!(summary, ExportSummary { included_files: 2, included_bytes: 3 });

        let mut archive = tar::Archive::new(first.as_slice());
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            assert_eq!(entry.header().mode().unwrap(), 0o644);
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            seen.push((entry.path().unwrap().to_string_lossy().into_owned(), body));
        }
        assert_eq!(
            seen,
            vec![
                ("a/b.txt".to_string(), "b".to_string()),
                ("z.txt".to_string(), "zz".to_string())
            ]
        );
    }

    #[test]
    fn over_limit_is_too_large() {
        let (_dir, blobs, manifest) = store_with(&[("big.bin", &[0u8; 64])]);
        let err = export_tar(&blobs, &manifest, 63).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooLarge);
    }
}
