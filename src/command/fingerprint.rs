use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::canonical::to_canonical_bytes;
use crate::fingerprint::{FingerprintService, GitProbe};

pub async fn run_fingerprint(repo_root: &Path) -> Result<()> {
    let service = FingerprintService::new(Arc::new(GitProbe::new(repo_root)));
    let fingerprint = service.compute().await?;
    let bytes = to_canonical_bytes(&fingerprint).context("Failed to encode fingerprint")?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
