//! Lease tools: lease.acquire, lease.release.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::common::{respond, Scope};
use crate::error::ToolResult;
use crate::guard::RepoPath;
use crate::mcp::types::{LeaseAcquireArgs, LeaseReleaseArgs};
use crate::workspace::Workspace;

#[derive(Debug, Serialize)]
struct AcquireBody<'a> {
    created_at: DateTime<Utc>,
    touched: Vec<&'a RepoPath>,
}

/// Issue a lease, or confirm an existing one still matches the repository.
pub async fn acquire(workspace: &Workspace, args: LeaseAcquireArgs) -> ToolResult<Value> {
    let lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
    let body = AcquireBody {
        created_at: lease.created_at(),
        touched: lease.touched().iter().collect(),
    };
    respond(&body, Scope::Worktree(&lease))
}

#[derive(Debug, Serialize)]
struct ReleaseBody {
    lease_id: String,
    released: bool,
}

pub async fn release(workspace: &Workspace, args: LeaseReleaseArgs) -> ToolResult<Value> {
    let released = workspace.leases().release(&args.lease_id);
    let body = ReleaseBody {
        lease_id: args.lease_id,
        released,
    };
    respond(&body, Scope::Stateless)
}
