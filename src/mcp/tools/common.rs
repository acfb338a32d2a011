//! Common utilities for MCP tools.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rmcp::model::{CallToolResult, Content};
use rmcp::ErrorData as McpError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::canonical::address_of;
use crate::error::{ToolError, ToolResult};
use crate::lease::LeaseGuard;
use crate::mcp::types::{Encoding, Mode};
use crate::snapshot::Snapshot;
use crate::workspace::Workspace;

/// Bytes inspected when deciding whether content is binary.
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// The view a response was computed from.
#[derive(Clone, Copy)]
pub enum Scope<'a> {
    Worktree(&'a LeaseGuard),
    Snapshot,
    /// Bookkeeping results tied to neither view; no `mode` or fingerprint.
    Stateless,
}

/// Wrap a response body in the common envelope.
///
/// `cache_key` is the content address of the body plus `mode` (and, for the
/// working tree, the lease's fingerprint). The lease id is added afterwards
/// so two leases looking at the same state share keys.
pub fn respond<T: Serialize>(body: &T, scope: Scope<'_>) -> ToolResult<Value> {
    let mut map = match serde_json::to_value(body)
        .map_err(|e| ToolError::Internal(format!("serializing response: {}", e)))?
    {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };

    let (mode, hint) = match scope {
        Scope::Worktree(lease) => {
            map.insert(
                "fingerprint".to_string(),
                serde_json::to_value(lease.base_fingerprint())
                    .map_err(|e| ToolError::Internal(e.to_string()))?,
            );
            (Some(Mode::Worktree), "until_dirty")
        }
        Scope::Snapshot => (Some(Mode::Snapshot), "immutable"),
        Scope::Stateless => (None, "immutable"),
    };
    if let Some(mode) = mode {
        map.insert(
            "mode".to_string(),
            serde_json::to_value(mode).map_err(|e| ToolError::Internal(e.to_string()))?,
        );
    }
    let cache_key = address_of(&map)?;

    if let Scope::Worktree(lease) = scope {
        map.insert("lease_id".to_string(), Value::String(lease.id().to_string()));
    }
    map.insert("cache_key".to_string(), Value::String(cache_key));
    map.insert("cache_hint".to_string(), Value::String(hint.to_string()));
    Ok(Value::Object(map))
}

/// Convert a façade result into an MCP tool result. Domain failures become
/// an `is_error` result carrying the structured error object.
pub fn into_call_result(result: ToolResult<Value>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => Ok(CallToolResult::success(vec![Content::json(value)?])),
        Err(err) => Ok(CallToolResult::error(vec![Content::json(err.to_payload())?])),
    }
}

/// NUL in the leading bytes marks content as binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Binary,
}

/// Text goes out as UTF-8; anything binary or not valid UTF-8 as base64.
pub fn encode_content(bytes: Vec<u8>) -> (ContentKind, Encoding, String) {
    if is_binary(&bytes) {
        return (ContentKind::Binary, Encoding::Base64, STANDARD.encode(&bytes));
    }
    match String::from_utf8(bytes) {
        Ok(text) => (ContentKind::Text, Encoding::Utf8, text),
        Err(err) => (
            ContentKind::Binary,
            Encoding::Base64,
            STANDARD.encode(err.as_bytes()),
        ),
    }
}

pub fn decode_content(content: &str, encoding: Encoding) -> ToolResult<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(content.as_bytes().to_vec()),
        Encoding::Base64 => STANDARD
            .decode(content)
            .map_err(|e| ToolError::InvalidArgument(format!("content is not valid base64: {}", e))),
    }
}

/// Worktree calls must not name a snapshot.
pub fn worktree_only(snapshot_id: &Option<String>) -> ToolResult<()> {
    match snapshot_id {
        Some(_) => Err(ToolError::InvalidArgument(
            "snapshot_id is only valid in snapshot mode".to_string(),
        )),
        None => Ok(()),
    }
}

/// Load the snapshot a snapshot-mode call names.
pub async fn require_snapshot(
    workspace: &Workspace,
    snapshot_id: Option<String>,
) -> ToolResult<Arc<Snapshot>> {
    let id = snapshot_id.ok_or_else(|| {
        ToolError::InvalidArgument("snapshot_id is required in snapshot mode".to_string())
    })?;
    load_snapshot(workspace, id).await
}

pub async fn load_snapshot(workspace: &Workspace, id: String) -> ToolResult<Arc<Snapshot>> {
    workspace
        .blocking(move |ws| ws.snapshots().get(&id))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_content_classification() {
        let (kind, encoding, content) = encode_content(b"hello\n".to_vec());
        assert_eq!((kind, encoding, content.as_str()), (ContentKind::Text, Encoding::Utf8, "hello\n"));

        let (kind, encoding, content) = encode_content(vec![0, 1, 2]);
        assert_eq!((kind, encoding), (ContentKind::Binary, Encoding::Base64));
        assert_eq!(decode_content(&content, Encoding::Base64).unwrap(), vec![0, 1, 2]);

        let (kind, _, _) = encode_content(vec![0xff, 0xfe, b'a']);
        assert_eq!(kind, ContentKind::Binary);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_content("not base64!!", Encoding::Base64).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidArgument);
    }
}
