//! MCP server implementation.
//!
//! This module contains the SnapshotMcpServer struct and its tool routing.

use rmcp::{
    handler::server::router::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use std::time::Instant;
use tracing::{info, warn};

use crate::workspace::Workspace;

use super::tools::{self, ToolRequest};
use super::types::*;

/// Repository snapshot MCP server
#[derive(Clone)]
pub struct SnapshotMcpServer {
    workspace: Workspace,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SnapshotMcpServer {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            tool_router: Self::tool_router(),
        }
    }

    /// Dispatch one call and log its outcome and duration.
    async fn run(&self, request: ToolRequest) -> Result<CallToolResult, McpError> {
        let name = request.name();
        let start_time = Instant::now();
        let result = tools::dispatch(&self.workspace, request).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!("{} ok in {}ms", name, duration_ms),
            Err(e) => warn!("{} failed in {}ms: {} ({})", name, duration_ms, e.code().as_str(), e),
        }
        tools::into_call_result(result)
    }

    #[tool(
        name = "lease.acquire",
        description = "Issue a worktree lease, or re-validate an existing one. A lease pins the repository fingerprint; every worktree call made with it fails with STALE_LEASE once the repository changes underneath it."
    )]
    async fn lease_acquire(
        &self,
        Parameters(args): Parameters<LeaseAcquireArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::LeaseAcquire(args)).await
    }

    #[tool(name = "lease.release", description = "Release a worktree lease. Releasing twice is harmless.")]
    async fn lease_release(
        &self,
        Parameters(args): Parameters<LeaseReleaseArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::LeaseRelease(args)).await
    }

    #[tool(
        name = "snapshot.list",
        description = "List one directory level of the working tree (honouring .gitignore) or of a snapshot. Supports limit/offset pagination."
    )]
    async fn snapshot_list(
        &self,
        Parameters(args): Parameters<ListArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::List(args)).await
    }

    #[tool(
        name = "snapshot.file",
        description = "Read one file from the working tree or a snapshot. Text is returned as UTF-8, binary content as base64."
    )]
    async fn snapshot_file(
        &self,
        Parameters(args): Parameters<FileArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::File(args)).await
    }

    #[tool(
        name = "snapshot.grep",
        description = "Search files for a regular expression in the working tree or a snapshot. Binary files are skipped."
    )]
    async fn snapshot_grep(
        &self,
        Parameters(args): Parameters<GrepArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::Grep(args)).await
    }

    #[tool(
        name = "snapshot.diff",
        description = "Unified diff between two snapshots, or between a snapshot and the live working tree."
    )]
    async fn snapshot_diff(
        &self,
        Parameters(args): Parameters<DiffArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::Diff(args)).await
    }

    #[tool(
        name = "snapshot.export",
        description = "Export a snapshot as a deterministic tar archive (base64 encoded)."
    )]
    async fn snapshot_export(
        &self,
        Parameters(args): Parameters<ExportArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::Export(args)).await
    }

    #[tool(
        name = "snapshot.create",
        description = "Capture an immutable snapshot of the paths read under a lease (or of explicit paths), or derive one from an existing snapshot."
    )]
    async fn snapshot_create(
        &self,
        Parameters(args): Parameters<CreateArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::Create(args)).await
    }

    #[tool(
        name = "snapshot.info",
        description = "Fingerprint, lineage and size statistics of a snapshot."
    )]
    async fn snapshot_info(
        &self,
        Parameters(args): Parameters<InfoArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::Info(args)).await
    }

    #[tool(
        name = "snapshot.changes",
        description = "Files added, modified or deleted between two snapshots."
    )]
    async fn snapshot_changes(
        &self,
        Parameters(args): Parameters<ChangesArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::Changes(args)).await
    }

    #[tool(
        name = "workspace.apply_patch",
        description = "Apply a unified diff. In worktree mode the patch is all-or-nothing; in snapshot mode matching hunks produce a new snapshot. Rejected hunks are reported with a reason."
    )]
    async fn workspace_apply_patch(
        &self,
        Parameters(args): Parameters<ApplyPatchArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::ApplyPatch(args)).await
    }

    #[tool(
        name = "workspace.write_file",
        description = "Write a whole file in the working tree under a lease."
    )]
    async fn workspace_write_file(
        &self,
        Parameters(args): Parameters<WriteFileArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::WriteFile(args)).await
    }

    #[tool(
        name = "workspace.delete",
        description = "Delete a file from the working tree under a lease."
    )]
    async fn workspace_delete(
        &self,
        Parameters(args): Parameters<DeleteArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.run(ToolRequest::Delete(args)).await
    }
}

#[tool_handler]
impl ServerHandler for SnapshotMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "repo-snapshot".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read the repository through a lease (worktree mode) or an immutable snapshot. \
                 Retry with a fresh lease on STALE_LEASE."
                    .to_string(),
            ),
        }
    }
}
