//! Closed error taxonomy shared by every tool.
//!
//! Tool failures leave the server as `{ "code", "message", "details" }`.
//! Patch rejects are not errors; see `patch::PatchResult`.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::canonical::CanonicalError;
use crate::fingerprint::Fingerprint;

/// Wire codes, one per `ToolError` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    RepoChanged,
    PermissionDenied,
    TooLarge,
    Internal,
    StaleLease,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::RepoChanged => "REPO_CHANGED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::TooLarge => "TOO_LARGE",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::StaleLease => "STALE_LEASE",
        }
    }

    /// Only a stale lease can succeed on retry (after re-acquiring).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::StaleLease)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("repository changed during {operation}")]
    RepoChanged {
        operation: &'static str,
        before: Fingerprint,
        after: Fingerprint,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{what} is too large ({size} bytes, limit {limit})")]
    TooLarge { what: String, size: u64, limit: u64 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("lease {lease_id} is stale (repository changed)")]
    StaleLease {
        lease_id: String,
        base: Option<Fingerprint>,
        current: Fingerprint,
    },
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

impl ToolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ToolError::NotFound(_) => ErrorCode::NotFound,
            ToolError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ToolError::RepoChanged { .. } => ErrorCode::RepoChanged,
            ToolError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            ToolError::TooLarge { .. } => ErrorCode::TooLarge,
            ToolError::Internal(_) => ErrorCode::Internal,
            ToolError::StaleLease { .. } => ErrorCode::StaleLease,
        }
    }

    pub fn details(&self) -> Value {
        match self {
            ToolError::RepoChanged {
                operation,
                before,
                after,
            } => json!({
                "operation": operation,
                "before_fingerprint": before,
                "current_fingerprint": after,
            }),
            ToolError::TooLarge { what, size, limit } => json!({
                "what": what,
                "size": size,
                "limit": limit,
            }),
            ToolError::StaleLease {
                lease_id,
                base,
                current,
            } => json!({
                "lease_id": lease_id,
                "base_fingerprint": base,
                "current_fingerprint": current,
            }),
            _ => json!({}),
        }
    }

    /// The structured error object returned to the agent.
    pub fn to_payload(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "details": self.details(),
            "retryable": self.code().is_retryable(),
        })
    }

    /// Map an I/O failure on `path` into the taxonomy.
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                ToolError::PermissionDenied(format!("{}: {}", path, err))
            }
            _ => ToolError::Internal(format!("{}: {}", path, err)),
        }
    }
}

impl From<CanonicalError> for ToolError {
    fn from(err: CanonicalError) -> Self {
        ToolError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ToolError {
    fn from(err: tokio::task::JoinError) -> Self {
        ToolError::Internal(format!("background task failed: {}", err))
    }
}
