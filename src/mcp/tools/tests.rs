//! End-to-end tool scenarios against real git repositories.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::{dispatch, ToolRequest};
use crate::canonical::content_address;
use crate::config::Limits;
use crate::error::{ErrorCode, ToolError};
use crate::fingerprint::GitProbe;
use crate::guard::PathGuard;
use crate::test_support::GitRepo;
use crate::workspace::Workspace;

struct Harness {
    repo: GitRepo,
    _data: TempDir,
    workspace: Workspace,
}

impl Harness {
    fn new(repo: GitRepo) -> Self {
        Self::with_limits(repo, Limits::default())
    }

    fn with_limits(repo: GitRepo, limits: Limits) -> Self {
        let data = TempDir::new().unwrap();
        let workspace = Workspace::with_probe(
            PathGuard::new(repo.path()).unwrap(),
            data.path(),
            limits,
            Arc::new(GitProbe::new(repo.path())),
        )
        .unwrap();
        Self {
            repo,
            _data: data,
            workspace,
        }
    }

    async fn ok(&self, request: ToolRequest) -> Value {
        let name = request.name();
        match dispatch(&self.workspace, request).await {
            Ok(value) => value,
            Err(e) => panic!("{} failed: {:?}", name, e),
        }
    }

    async fn err(&self, request: ToolRequest) -> ToolError {
        let name = request.name();
        match dispatch(&self.workspace, request).await {
            Ok(value) => panic!("{} unexpectedly succeeded: {}", name, value),
            Err(e) => e,
        }
    }

    async fn lease(&self) -> String {
        let value = self.ok(ToolRequest::LeaseAcquire(Default::default())).await;
        value["lease_id"].as_str().unwrap().to_string()
    }
}

fn args<T: DeserializeOwned>(value: Value) -> T {
    serde_json::from_value(value).unwrap()
}

fn paths(manifest: &Value) -> Vec<&str> {
    manifest["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_snapshot_captures_exactly_what_was_read() {
    let h = Harness::new(GitRepo::with_hello());
    let lease = h.lease().await;

    let empty = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease }))))
        .await;
    assert!(paths(&empty["manifest"]).is_empty());
    assert_eq!(empty["cache_hint"], "immutable");

    let read = h
        .ok(ToolRequest::File(args(json!({
            "path": "a.txt", "mode": "worktree", "lease_id": lease
        }))))
        .await;
    assert_eq!(read["content"], "hello\n");
    assert_eq!(read["kind"], "text");
    assert_eq!(read["encoding"], "utf8");
    assert_eq!(read["lease_id"], lease.as_str());
    assert_eq!(read["cache_hint"], "until_dirty");

    let captured = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(paths(&captured["manifest"]), vec!["a.txt"]);
    assert_eq!(
        captured["manifest"]["entries"][0]["blob_hash"],
        content_address(b"hello\n").as_str()
    );
    assert_ne!(captured["snapshot_id"], empty["snapshot_id"]);
    assert_eq!(captured["fingerprint"], read["fingerprint"]);
}

#[tokio::test]
async fn test_rejected_patch_keeps_tree_and_fingerprint() {
    let h = Harness::new(GitRepo::with_hello());
    let acquired = h.ok(ToolRequest::LeaseAcquire(Default::default())).await;
    let lease = acquired["lease_id"].as_str().unwrap();

    let patch = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-goodbye\n+hello again\n";
    let result = h
        .ok(ToolRequest::ApplyPatch(args(json!({
            "patch": patch, "mode": "worktree", "lease_id": lease
        }))))
        .await;

    assert_eq!(result["applied"], false);
    assert_eq!(
        result["rejects"],
        json!([{ "path": "a.txt", "hunk_index": 0, "reason": "context_mismatch" }])
    );
    assert_eq!(result["new_state"]["fingerprint"], acquired["fingerprint"]);
    assert_eq!(h.repo.read("a.txt"), b"hello\n");

    // nothing moved, so the lease is still good
    let again = h
        .ok(ToolRequest::LeaseAcquire(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(again["fingerprint"], acquired["fingerprint"]);
}

#[tokio::test]
async fn test_external_change_makes_lease_stale() {
    let h = Harness::new(GitRepo::with_hello());
    let lease = h.lease().await;
    h.repo.write("a.txt", "edited elsewhere\n");

    let err = h
        .err(ToolRequest::File(args(json!({ "path": "a.txt", "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::StaleLease);
    let payload = err.to_payload();
    assert_eq!(payload["details"]["lease_id"], lease.as_str());
    assert_ne!(
        payload["details"]["base_fingerprint"],
        payload["details"]["current_fingerprint"]
    );
    assert_eq!(payload["retryable"], true);

    let fresh = h.lease().await;
    let read = h
        .ok(ToolRequest::File(args(json!({ "path": "a.txt", "lease_id": fresh }))))
        .await;
    assert_eq!(read["content"], "edited elsewhere\n");
}

#[tokio::test]
async fn test_own_writes_rotate_the_lease() {
    let h = Harness::new(GitRepo::with_hello());
    let acquired = h.ok(ToolRequest::LeaseAcquire(Default::default())).await;
    let lease = acquired["lease_id"].as_str().unwrap();

    let written = h
        .ok(ToolRequest::WriteFile(args(json!({
            "path": "b.txt", "content": "bee\n", "lease_id": lease
        }))))
        .await;
    assert_eq!(written["created"], true);
    assert_eq!(written["bytes_written"], 4);
    assert_ne!(written["fingerprint"], acquired["fingerprint"]);
    assert_eq!(h.repo.read("b.txt"), b"bee\n");

    let patch = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-hello\n+goodbye\n";
    let patched = h
        .ok(ToolRequest::ApplyPatch(args(json!({ "patch": patch, "lease_id": lease }))))
        .await;
    assert_eq!(patched["applied"], true);
    assert_eq!(patched["applied_paths"], json!(["a.txt"]));
    assert_eq!(patched["new_state"]["fingerprint"], patched["fingerprint"]);
    assert_eq!(h.repo.read("a.txt"), b"goodbye\n");

    let acquired = h
        .ok(ToolRequest::LeaseAcquire(args(json!({ "lease_id": lease }))))
        .await;
    let touched: Vec<&str> = acquired["touched"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert_eq!(touched, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn test_snapshot_patch_derives_a_new_snapshot() {
    let h = Harness::new(GitRepo::with_hello());
    let lease = h.lease().await;
    let source = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease, "paths": ["a.txt"] }))))
        .await;
    let source_id = source["snapshot_id"].as_str().unwrap();

    let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-hello\n+bonjour\n--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+new\n";
    let result = h
        .ok(ToolRequest::ApplyPatch(args(json!({
            "patch": text, "mode": "snapshot", "snapshot_id": source_id
        }))))
        .await;
    assert_eq!(result["applied"], true);
    let derived_id = result["new_state"]["snapshot_id"].as_str().unwrap();
    assert_ne!(derived_id, source_id);
    assert_eq!(h.repo.read("a.txt"), b"hello\n");

    let read = h
        .ok(ToolRequest::File(args(json!({
            "path": "a.txt", "mode": "snapshot", "snapshot_id": derived_id
        }))))
        .await;
    assert_eq!(read["content"], "bonjour\n");

    let changes = h
        .ok(ToolRequest::Changes(args(json!({
            "snapshot_id": derived_id, "from_snapshot_id": source_id
        }))))
        .await;
    assert_eq!(
        changes["files_changed"],
        json!([
            { "path": "a.txt", "type": "modified" },
            { "path": "new.txt", "type": "added" }
        ])
    );

    let info = h
        .ok(ToolRequest::Info(args(json!({ "snapshot_id": derived_id }))))
        .await;
    assert_eq!(info["derived_from"], source_id);
    assert_eq!(info["applied_patch_hash"], content_address(text.as_bytes()).as_str());
    assert_eq!(info["manifest_stats"], json!({ "files": 2, "bytes": 12 }));

    let diff = h
        .ok(ToolRequest::Diff(args(json!({
            "mode": "snapshot", "snapshot_id": derived_id, "from_snapshot_id": source_id, "path": "a.txt"
        }))))
        .await;
    assert!(diff["diff"].as_str().unwrap().contains("-hello\n+bonjour\n"));
    assert_eq!(diff["files"], json!([{ "path": "a.txt", "type": "modified" }]));
}

#[tokio::test]
async fn test_list_paginates_and_honours_gitignore() {
    let repo = GitRepo::with_hello();
    repo.write(".gitignore", "ignored/\n");
    repo.write("b/c.txt", "c\n");
    repo.write("d.txt", "d\n");
    repo.write("ignored/x.txt", "x\n");
    let h = Harness::new(repo);
    let lease = h.lease().await;

    let first = h
        .ok(ToolRequest::List(args(json!({ "path": "", "lease_id": lease, "limit": 2 }))))
        .await;
    let names: Vec<&str> = first["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec![".gitignore", "a.txt"]);
    assert_eq!(first["total"], 4);
    assert_eq!(first["truncated"], true);

    let second = h
        .ok(ToolRequest::List(args(json!({ "lease_id": lease, "limit": 2, "offset": 2 }))))
        .await;
    assert_eq!(second["entries"][0], json!({ "path": "b", "type": "dir" }));
    assert_eq!(second["entries"][1]["path"], "d.txt");
    assert_eq!(second["truncated"], false);

    let missing = h
        .err(ToolRequest::List(args(json!({ "path": "nope", "lease_id": lease }))))
        .await;
    assert_eq!(missing.code(), ErrorCode::NotFound);

    let snap = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease, "paths": ["b/c.txt", "a.txt"] }))))
        .await;
    let id = snap["snapshot_id"].as_str().unwrap();
    let listed = h
        .ok(ToolRequest::List(args(json!({ "mode": "snapshot", "snapshot_id": id }))))
        .await;
    assert_eq!(
        listed["entries"],
        json!([
            { "path": "a.txt", "type": "file", "size": 6, "blob_hash": content_address(b"hello\n") },
            { "path": "b", "type": "dir" }
        ])
    );
    let uncaptured = h
        .ok(ToolRequest::List(args(json!({ "path": "d", "mode": "snapshot", "snapshot_id": id }))))
        .await;
    assert_eq!(uncaptured["entries"], json!([]));
}

#[tokio::test]
async fn test_grep_touches_every_candidate() {
    let repo = GitRepo::with_hello();
    repo.write("src/a.rs", "fn main() {}\nfn helper() {}\n");
    repo.write("src/b.rs", "fn other() {}\n");
    repo.write("blob.dat", b"fn \0binary".to_vec());
    let h = Harness::new(repo);
    let lease = h.lease().await;

    let found = h
        .ok(ToolRequest::Grep(args(json!({
            "pattern": r"fn \w+", "lease_id": lease, "max_matches": 2
        }))))
        .await;
    assert_eq!(found["truncated"], true);
    assert_eq!(found["files_scanned"], 3);
    assert_eq!(
        found["matches"],
        json!([{
            "path": "src/a.rs",
            "lines": [
                { "line": 1, "col": 1, "text": "fn main() {}" },
                { "line": 2, "col": 1, "text": "fn helper() {}" }
            ]
        }])
    );

    let snap = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(paths(&snap["manifest"]), vec!["a.txt", "src/a.rs", "src/b.rs"]);

    let in_snapshot = h
        .ok(ToolRequest::Grep(args(json!({
            "pattern": "OTHER", "case_insensitive": true, "mode": "snapshot",
            "snapshot_id": snap["snapshot_id"], "paths": ["src"]
        }))))
        .await;
    assert_eq!(in_snapshot["matches"][0]["path"], "src/b.rs");
    assert_eq!(in_snapshot["matches"][0]["lines"][0]["col"], 4);

    let bad = h
        .err(ToolRequest::Grep(args(json!({ "pattern": "(", "lease_id": lease }))))
        .await;
    assert_eq!(bad.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_path_guard_runs_before_lease_validation() {
    let h = Harness::new(GitRepo::with_hello());

    for path in ["../outside.txt", ".git/config", "/etc/passwd", "a/../../x"] {
        let err = h
            .err(ToolRequest::WriteFile(args(json!({
                "path": path, "content": "x", "lease_id": "not-a-lease"
            }))))
            .await;
        assert_eq!(err.code(), ErrorCode::PermissionDenied, "{}", path);
    }

    let patch = "--- a/../escape.txt\n+++ b/../escape.txt\n@@ -0,0 +1 @@\n+x\n";
    let err = h
        .err(ToolRequest::ApplyPatch(args(json!({ "patch": patch, "lease_id": "not-a-lease" }))))
        .await;
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    let lease = h.lease().await;
    let err = h
        .err(ToolRequest::File(args(json!({ "path": ".git/HEAD", "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn test_cache_keys_ignore_the_lease_id() {
    let h = Harness::new(GitRepo::with_hello());
    let (first, second) = (h.lease().await, h.lease().await);
    let read = |lease: String| ToolRequest::File(args(json!({ "path": "a.txt", "lease_id": lease })));

    let a = h.ok(read(first)).await;
    let b = h.ok(read(second)).await;
    assert_ne!(a["lease_id"], b["lease_id"]);
    assert_eq!(a["cache_key"], b["cache_key"]);
    assert!(a["cache_key"].as_str().unwrap().starts_with("sha256:"));
}

#[tokio::test]
async fn test_worktree_diff_against_snapshot() {
    let h = Harness::new(GitRepo::with_hello());
    let lease = h.lease().await;
    let snap = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease, "paths": ["a.txt"] }))))
        .await;
    h.ok(ToolRequest::WriteFile(args(json!({
        "path": "a.txt", "content": "bye\n", "lease_id": lease
    }))))
    .await;

    let diff = h
        .ok(ToolRequest::Diff(args(json!({
            "mode": "worktree", "from_snapshot_id": snap["snapshot_id"], "path": "a.txt", "lease_id": lease
        }))))
        .await;
    let text = diff["diff"].as_str().unwrap();
    assert!(text.starts_with("diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n"));
    assert!(text.contains("@@ -1 +1 @@\n-hello\n+bye\n"));
    assert_eq!(diff["files"], json!([{ "path": "a.txt", "type": "modified" }]));

    let missing_base = h
        .err(ToolRequest::Diff(args(json!({ "mode": "worktree", "lease_id": lease }))))
        .await;
    assert_eq!(missing_base.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_export_is_a_tar_of_the_manifest() {
    let h = Harness::new(GitRepo::with_hello());
    let lease = h.lease().await;
    let snap = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease, "paths": ["a.txt"] }))))
        .await;

    let exported = h
        .ok(ToolRequest::Export(args(json!({ "snapshot_id": snap["snapshot_id"] }))))
        .await;
    assert_eq!(exported["summary"], json!({ "included_files": 1, "included_bytes": 6 }));
    let bundle = exported["bundle"].as_str().unwrap();
    let bytes = STANDARD.decode(bundle.strip_prefix("base64:").unwrap()).unwrap();
    let mut archive = tar::Archive::new(bytes.as_slice());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.txt"]);
}

#[tokio::test]
async fn test_limits_and_file_kinds() {
    let repo = GitRepo::with_hello();
    repo.write("img.bin", vec![0u8, 159, 146, 150]);
    let limits = Limits {
        max_file_bytes: 5,
        ..Limits::default()
    };
    let h = Harness::with_limits(repo, limits);
    let lease = h.lease().await;

    let err = h
        .err(ToolRequest::File(args(json!({ "path": "a.txt", "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::TooLarge);
    assert_eq!(err.to_payload()["details"]["size"], 6);

    let binary = h
        .ok(ToolRequest::File(args(json!({ "path": "img.bin", "lease_id": lease }))))
        .await;
    assert_eq!(binary["kind"], "binary");
    assert_eq!(binary["encoding"], "base64");
    assert_eq!(binary["content"], STANDARD.encode([0u8, 159, 146, 150]));
}

#[tokio::test]
async fn test_write_and_delete_rules() {
    let h = Harness::new(GitRepo::with_hello());
    let lease = h.lease().await;

    let no_parent = h
        .err(ToolRequest::WriteFile(args(json!({
            "path": "dir/x.txt", "content": "x", "lease_id": lease
        }))))
        .await;
    assert_eq!(no_parent.code(), ErrorCode::NotFound);

    h.ok(ToolRequest::WriteFile(args(json!({
        "path": "dir/x.txt", "content": "eA==", "encoding": "base64",
        "create_dirs": true, "lease_id": lease
    }))))
    .await;
    assert_eq!(h.repo.read("dir/x.txt"), b"x");

    let dir = h
        .err(ToolRequest::Delete(args(json!({ "path": "dir", "lease_id": lease }))))
        .await;
    assert_eq!(dir.code(), ErrorCode::InvalidArgument);

    let dry = h
        .ok(ToolRequest::Delete(args(json!({ "path": "dir/x.txt", "dry_run": true, "lease_id": lease }))))
        .await;
    assert_eq!(dry["deleted"], false);
    assert!(h.repo.abs("dir/x.txt").exists());

    h.ok(ToolRequest::Delete(args(json!({ "path": "dir/x.txt", "lease_id": lease }))))
        .await;
    assert!(!h.repo.abs("dir/x.txt").exists());

    let gone = h
        .err(ToolRequest::Delete(args(json!({ "path": "dir/x.txt", "lease_id": lease }))))
        .await;
    assert_eq!(gone.code(), ErrorCode::NotFound);

    let released = h
        .ok(ToolRequest::LeaseRelease(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(released["released"], true);
    assert!(released["cache_key"].as_str().unwrap().starts_with("sha256:"));
    assert_eq!(released["cache_hint"], "immutable");
    assert!(released.get("mode").is_none());
    assert!(released.get("fingerprint").is_none());
    let again = h
        .ok(ToolRequest::LeaseRelease(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(again["released"], false);
    assert_ne!(again["cache_key"], released["cache_key"]);
    let err = h
        .err(ToolRequest::LeaseAcquire(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::StaleLease);
}

#[tokio::test]
async fn test_unknown_snapshot_is_not_found() {
    let h = Harness::new(GitRepo::with_hello());
    let missing = format!("sha256:{}", "0".repeat(64));
    let err = h
        .err(ToolRequest::Info(args(json!({ "snapshot_id": missing }))))
        .await;
    assert_eq!(err.code(), ErrorCode::NotFound);

    let err = h
        .err(ToolRequest::File(args(json!({ "path": "a.txt", "mode": "snapshot" }))))
        .await;
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[cfg(unix)]
#[tokio::test]
async fn test_capture_skips_symlinks_touched_by_list() {
    use std::os::unix::fs::symlink;

    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("secret.txt"), "secret\n").unwrap();
    let repo = GitRepo::with_hello();
    symlink("no-such-file", repo.abs("dangling")).unwrap();
    symlink(outside.path().join("secret.txt"), repo.abs("escape")).unwrap();
    let h = Harness::new(repo);
    let lease = h.lease().await;

    let listed = h
        .ok(ToolRequest::List(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(listed["total"], 3);

    let snap = h
        .ok(ToolRequest::Create(args(json!({ "lease_id": lease }))))
        .await;
    assert_eq!(paths(&snap["manifest"]), vec!["a.txt"]);

    let named = h
        .err(ToolRequest::Create(args(json!({ "lease_id": lease, "paths": ["escape"] }))))
        .await;
    assert_eq!(named.code(), ErrorCode::PermissionDenied);
}

#[cfg(unix)]
#[tokio::test]
async fn test_writes_through_escaping_symlinks_are_denied() {
    use std::os::unix::fs::symlink;

    let outside = TempDir::new().unwrap();
    let secret = outside.path().join("secret.txt");
    fs::write(&secret, "secret\n").unwrap();
    let repo = GitRepo::with_hello();
    symlink(&secret, repo.abs("link")).unwrap();
    symlink(outside.path(), repo.abs("outdir")).unwrap();
    let h = Harness::new(repo);
    let lease = h.lease().await;

    for path in ["link", "outdir/new.txt", "outdir/secret.txt"] {
        let err = h
            .err(ToolRequest::WriteFile(args(json!({
                "path": path, "content": "pwned\n", "create_dirs": true, "lease_id": lease
            }))))
            .await;
        assert_eq!(err.code(), ErrorCode::PermissionDenied, "{}", path);
    }

    let patch = "--- a/link\n+++ b/link\n@@ -1 +1 @@\n-secret\n+pwned\n";
    let err = h
        .err(ToolRequest::ApplyPatch(args(json!({ "patch": patch, "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    let patch = "--- /dev/null\n+++ b/outdir/planted.txt\n@@ -0,0 +1 @@\n+x\n";
    let err = h
        .err(ToolRequest::ApplyPatch(args(json!({ "patch": patch, "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    let err = h
        .err(ToolRequest::Delete(args(json!({ "path": "link", "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    assert_eq!(fs::read(&secret).unwrap(), b"secret\n");
    assert!(!outside.path().join("new.txt").exists());
    assert!(!outside.path().join("planted.txt").exists());
    assert!(fs::symlink_metadata(h.repo.abs("link")).is_ok());
}

#[tokio::test]
async fn test_failed_patch_write_rolls_back_every_file() {
    let h = Harness::new(GitRepo::with_hello());
    let lease = h.lease().await;
    // the temp file next to this name would exceed the file name limit
    let long = "z".repeat(240);
    let patch = format!(
        "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-hello\n+HELLO\n--- /dev/null\n+++ b/b/new.txt\n@@ -0,0 +1 @@\n+new\n--- /dev/null\n+++ b/{}\n@@ -0,0 +1 @@\n+boom\n",
        long
    );

    let err = h
        .err(ToolRequest::ApplyPatch(args(json!({ "patch": patch, "lease_id": lease }))))
        .await;
    assert_eq!(err.code(), ErrorCode::Internal);
    assert_eq!(h.repo.read("a.txt"), b"hello\n");
    assert!(!h.repo.abs("b/new.txt").exists());
    assert!(!h.repo.abs("b").exists());

    // the tree is back where the lease started
    h.ok(ToolRequest::LeaseAcquire(args(json!({ "lease_id": lease }))))
        .await;
}

#[tokio::test]
async fn test_cancelled_patch_is_all_or_nothing() {
    let repo = GitRepo::with_hello();
    let h = Harness::new(repo);
    let patch = "--- a/one.txt\n+++ b/one.txt\n@@ -1 +1 @@\n-old\n+new\n--- a/two.txt\n+++ b/two.txt\n@@ -1 +1 @@\n-old\n+new\n";

    for delay in [0u64, 1, 5, 20] {
        h.repo.write("one.txt", "old\n");
        h.repo.write("two.txt", "old\n");
        let lease = h.lease().await;
        let call = dispatch(
            &h.workspace,
            ToolRequest::ApplyPatch(args(json!({ "patch": patch, "lease_id": lease }))),
        );
        let _ = tokio::time::timeout(Duration::from_millis(delay), call).await;
        // a write already handed to the blocking pool runs to completion
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (one, two) = (h.repo.read("one.txt"), h.repo.read("two.txt"));
        assert_eq!(one, two, "torn write after {}ms", delay);
        assert!(one == b"old\n" || one == b"new\n");
        let leftovers: Vec<_> = fs::read_dir(h.repo.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }
}
