//! MCP (Model Context Protocol) server implementation using rmcp.
//!
//! The server exposes the repository through worktree leases and immutable
//! snapshots; see [`tools`] for the individual tools.

mod handlers;
mod server;
pub mod tools;
pub mod types;

pub use handlers::run_mcp_server;
