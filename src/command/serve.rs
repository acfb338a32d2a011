use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::mcp;
use crate::workspace::Workspace;

pub async fn run_serve(config: Config) -> Result<()> {
    info!(
        "serving {} (data dir {})",
        config.repo_root.display(),
        config.data_dir.display()
    );
    let workspace = Workspace::open(&config)?;
    mcp::run_mcp_server(workspace).await
}
