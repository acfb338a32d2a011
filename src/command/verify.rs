use anyhow::{bail, Result};

use crate::config::Config;
use crate::error::ToolError;
use crate::store::{BlobStore, SnapshotStore};

/// Re-hash every blob and re-derive every snapshot record.
pub async fn run_verify(config: &Config) -> Result<()> {
    let blobs = BlobStore::open(&config.data_dir)?;
    let records = SnapshotStore::open(&config.data_dir)?;
    let (report, broken) = tokio::task::spawn_blocking(move || {
        let report = blobs.verify_all()?;
        let mut broken = Vec::new();
        for id in records.ids()? {
            if let Err(e) = records.get(&id) {
                broken.push(format!("{} ({})", id, e));
            }
        }
        Ok::<_, ToolError>((report, broken))
    })
    .await??;

    println!("Checked {} blobs in {}", report.checked, config.data_dir.display());
    if report.corrupt.is_empty() && broken.is_empty() {
        println!("No corrupt blobs or snapshot records found.");
        return Ok(());
    }
    for hash in &report.corrupt {
        println!("  corrupt blob: {}", hash);
    }
    for record in &broken {
        println!("  broken snapshot: {}", record);
    }
    bail!(
        "{} corrupt blob(s), {} broken snapshot record(s)",
        report.corrupt.len(),
        broken.len()
    );
}
