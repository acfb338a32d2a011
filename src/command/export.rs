use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::mcp::tools::export_archive;
use crate::workspace::Workspace;

pub async fn run_export(config: &Config, snapshot_id: &str, output: &Path) -> Result<()> {
    let workspace = Workspace::open(config)?;
    let (bytes, summary) = export_archive(&workspace, snapshot_id, &[])?;
    fs::write(output, &bytes)
        .with_context(|| format!("Failed to write archive to {}", output.display()))?;

    println!(
        "Exported {} ({} files, {} bytes) to {}",
        snapshot_id,
        summary.included_files,
        summary.included_bytes,
        output.display()
    );
    Ok(())
}
