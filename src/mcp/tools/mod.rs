//! MCP tool implementations.
//!
//! Each tool family lives in its own module. [`ToolRequest`] is the closed
//! set of calls the server accepts and [`dispatch`] is the only place that
//! routes them.

mod common;
mod lease;
mod read;
mod snapshot;
mod write;
#[cfg(test)]
mod tests;

pub use common::into_call_result;
pub use snapshot::export_archive;

use serde_json::Value;

use crate::error::ToolResult;
use crate::workspace::Workspace;

use super::types::*;

#[derive(Debug)]
pub enum ToolRequest {
    LeaseAcquire(LeaseAcquireArgs),
    LeaseRelease(LeaseReleaseArgs),
    List(ListArgs),
    File(FileArgs),
    Grep(GrepArgs),
    Diff(DiffArgs),
    Export(ExportArgs),
    Create(CreateArgs),
    Info(InfoArgs),
    Changes(ChangesArgs),
    ApplyPatch(ApplyPatchArgs),
    WriteFile(WriteFileArgs),
    Delete(DeleteArgs),
}

impl ToolRequest {
    /// Wire name of the tool.
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::LeaseAcquire(_) => "lease.acquire",
            ToolRequest::LeaseRelease(_) => "lease.release",
            ToolRequest::List(_) => "snapshot.list",
            ToolRequest::File(_) => "snapshot.file",
            ToolRequest::Grep(_) => "snapshot.grep",
            ToolRequest::Diff(_) => "snapshot.diff",
            ToolRequest::Export(_) => "snapshot.export",
            ToolRequest::Create(_) => "snapshot.create",
            ToolRequest::Info(_) => "snapshot.info",
            ToolRequest::Changes(_) => "snapshot.changes",
            ToolRequest::ApplyPatch(_) => "workspace.apply_patch",
            ToolRequest::WriteFile(_) => "workspace.write_file",
            ToolRequest::Delete(_) => "workspace.delete",
        }
    }
}

/// Run one tool call to completion.
pub async fn dispatch(workspace: &Workspace, request: ToolRequest) -> ToolResult<Value> {
    match request {
        ToolRequest::LeaseAcquire(args) => lease::acquire(workspace, args).await,
        ToolRequest::LeaseRelease(args) => lease::release(workspace, args).await,
        ToolRequest::List(args) => read::list(workspace, args).await,
        ToolRequest::File(args) => read::file(workspace, args).await,
        ToolRequest::Grep(args) => read::grep(workspace, args).await,
        ToolRequest::Diff(args) => read::diff(workspace, args).await,
        ToolRequest::Export(args) => snapshot::export(workspace, args).await,
        ToolRequest::Create(args) => snapshot::create(workspace, args).await,
        ToolRequest::Info(args) => snapshot::info(workspace, args).await,
        ToolRequest::Changes(args) => snapshot::changes(workspace, args).await,
        ToolRequest::ApplyPatch(args) => write::apply_patch(workspace, args).await,
        ToolRequest::WriteFile(args) => write::write_file(workspace, args).await,
        ToolRequest::Delete(args) => write::delete(workspace, args).await,
    }
}
