//! MCP server handlers.
//!
//! This module contains only the MCP server startup logic; the workspace is
//! opened by the caller.

use anyhow::Result;
use tracing::{error, info};

use crate::workspace::Workspace;

use super::server::SnapshotMcpServer;

/// Run the MCP server over stdio until the client disconnects.
pub async fn run_mcp_server(workspace: Workspace) -> Result<()> {
    info!("Starting repo-snapshot MCP server (stdio)");

    let server = SnapshotMcpServer::new(workspace);

    run_server(server).await
}

/// Run the MCP server with the given server instance.
async fn run_server(server: SnapshotMcpServer) -> Result<()> {
    use rmcp::{transport::stdio, ServiceExt};

    // Start the service
    let service = server.serve(stdio()).await.map_err(|e| {
        error!("Failed to start MCP service: {:?}", e);
        anyhow::anyhow!("Failed to start MCP service: {:?}", e)
    })?;
    info!("Ready for MCP client connections");

    // Wait for service to complete
    service.waiting().await.map_err(|e| {
        error!("MCP service error: {:?}", e);
        anyhow::anyhow!("MCP service error: {:?}", e)
    })?;

    info!("MCP server shutting down");
    Ok(())
}
