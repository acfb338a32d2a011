//! On-disk persistence: content-addressed blobs and snapshot records.
//!
//! Both live under the data directory, outside the repository worktree,
//! and are keyed purely by content hash and snapshot id.

mod blob;
mod snapshots;

pub use blob::{BlobStore, VerifyReport};
pub use snapshots::SnapshotStore;
