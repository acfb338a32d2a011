//! Canonical JSON encoding and content addressing.
//!
//! Every hash in the server (status digest, blob address, snapshot id,
//! cache key) is computed over bytes produced here, so two structurally
//! equal values always hash identically.
//!
//! Canonical rules:
//! - object keys sorted by UTF-8 byte order, recursively
//! - no insignificant whitespace, no trailing newline
//! - arrays keep caller order (callers pre-sort meaningful arrays)
//! - non-finite floats encode as `null`, as `serde_json` renders them; no
//!   hashed structure carries a float

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix used for every content address rendered by the server.
pub const HASH_PREFIX: &str = "sha256:";

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("canonical json encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&canon_value(value))?)
}

fn canon_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            let mut canon = Map::new();
            for (key, value) in entries {
                canon.insert(key, canon_value(value));
            }
            Value::Object(canon)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canon_value).collect()),
        other => other,
    }
}

/// Bare lowercase hex SHA-256 of `bytes`.
pub fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Tagged content address (`sha256:<hex>`) of `bytes`.
pub fn content_address(bytes: &[u8]) -> String {
    format!("{}{}", HASH_PREFIX, hex_digest(bytes))
}

/// Content address of the canonical encoding of `value`.
pub fn address_of<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    Ok(content_address(&to_canonical_bytes(value)?))
}

/// Check that `raw` is a well-formed `sha256:<64 hex>` address and return the hex part.
pub fn parse_address(raw: &str) -> Option<&str> {
    let hex = raw.strip_prefix(HASH_PREFIX)?;
    if hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        Some(hex)
    } else {
        None
    }
}
