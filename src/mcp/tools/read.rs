//! Read tools: snapshot.list, snapshot.file, snapshot.grep, snapshot.diff.
//!
//! Every read runs against one of two views. Worktree reads validate a lease
//! first and record what they returned on it; snapshot reads resolve only
//! what the snapshot captured.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;
use similar::TextDiff;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::common::{
    encode_content, is_binary, load_snapshot, require_snapshot, respond, worktree_only,
    ContentKind, Scope,
};
use crate::canonical::content_address;
use crate::error::{ErrorCode, ToolError, ToolResult};
use crate::guard::{normalize, normalize_all, RepoPath};
use crate::mcp::types::{DiffArgs, Encoding, FileArgs, GrepArgs, ListArgs, Mode};
use crate::snapshot::{changes, Change, ChangeKind, Node, Snapshot};
use crate::workspace::{collect_files, list_dir, EntryKind, Workspace};

#[derive(Debug, Serialize)]
struct ListEntry {
    path: String,
    #[serde(rename = "type")]
    kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blob_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListBody {
    path: RepoPath,
    entries: Vec<ListEntry>,
    total: usize,
    offset: usize,
    truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<String>,
}

fn page<T>(items: Vec<T>, offset: usize, limit: usize) -> (Vec<T>, usize, bool) {
    let total = items.len();
    let page: Vec<T> = items.into_iter().skip(offset).take(limit).collect();
    let truncated = offset.saturating_add(page.len()) < total;
    (page, total, truncated)
}

pub async fn list(workspace: &Workspace, args: ListArgs) -> ToolResult<Value> {
    let dir = normalize(&args.path)?;
    let max = workspace.limits().max_list_entries;
    let limit = args.limit.unwrap_or(max).min(max);
    let offset = args.offset.unwrap_or(0);

    match args.mode {
        Mode::Snapshot => {
            let snapshot = require_snapshot(workspace, args.snapshot_id).await?;
            let body = workspace
                .blocking(move |ws| {
                    if snapshot.manifest.get(dir.as_str()).is_some() {
                        return Err(ToolError::InvalidArgument(format!("{} is not a directory", dir)));
                    }
                    let nodes = snapshot.manifest.children(&dir);
                    let (nodes, total, truncated) = page(nodes, offset, limit);
                    let mut entries = Vec::with_capacity(nodes.len());
                    for node in nodes {
                        entries.push(match node {
                            Node::Dir(path) => ListEntry {
                                path: path.to_string(),
                                kind: EntryKind::Dir,
                                size: None,
                                blob_hash: None,
                            },
                            Node::File(entry) => ListEntry {
                                path: entry.path.clone(),
                                kind: EntryKind::File,
                                size: ws.snapshots().blobs().size(&entry.blob_hash)?,
                                blob_hash: Some(entry.blob_hash.clone()),
                            },
                        });
                    }
                    Ok(ListBody {
                        path: dir,
                        entries,
                        total,
                        offset,
                        truncated,
                        snapshot_id: Some(snapshot.id.clone()),
                    })
                })
                .await?;
            respond(&body, Scope::Snapshot)
        }
        Mode::Worktree => {
            worktree_only(&args.snapshot_id)?;
            let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
            let listed = {
                let dir = dir.clone();
                workspace.blocking(move |ws| list_dir(ws.guard(), &dir)).await?
            };
            let (listed, total, truncated) = page(listed, offset, limit);

            lease.touch_with_parents(&dir);
            lease.touch(listed.iter().map(|e| e.path.clone()));
            let body = ListBody {
                path: dir,
                entries: listed
                    .into_iter()
                    .map(|e| ListEntry {
                        path: e.path.to_string(),
                        kind: e.kind,
                        size: e.size,
                        blob_hash: None,
                    })
                    .collect(),
                total,
                offset,
                truncated,
                snapshot_id: None,
            };
            respond(&body, Scope::Worktree(&lease))
        }
    }
}

#[derive(Debug, Serialize)]
struct FileBody {
    path: RepoPath,
    kind: ContentKind,
    encoding: Encoding,
    content: String,
    size: u64,
    blob_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<String>,
}

fn too_large(path: &RepoPath, size: u64, limit: u64) -> ToolError {
    ToolError::TooLarge {
        what: path.to_string(),
        size,
        limit,
    }
}

/// Read a live regular file, refusing directories and oversize files.
fn read_live(workspace: &Workspace, path: &RepoPath) -> ToolResult<Vec<u8>> {
    let real = workspace.guard().resolve_read(path)?;
    let meta = fs::metadata(&real).map_err(|e| ToolError::io(path, e))?;
    if meta.is_dir() {
        return Err(ToolError::InvalidArgument(format!("{} is a directory", path)));
    }
    let limit = workspace.limits().max_file_bytes;
    if meta.len() > limit {
        return Err(too_large(path, meta.len(), limit));
    }
    fs::read(&real).map_err(|e| ToolError::io(path, e))
}

fn file_body(path: RepoPath, bytes: Vec<u8>, blob_hash: String, snapshot_id: Option<String>) -> FileBody {
    let size = bytes.len() as u64;
    let (kind, encoding, content) = encode_content(bytes);
    FileBody {
        path,
        kind,
        encoding,
        content,
        size,
        blob_hash,
        snapshot_id,
    }
}

pub async fn file(workspace: &Workspace, args: FileArgs) -> ToolResult<Value> {
    let path = normalize(&args.path)?;
    if path.is_root() {
        return Err(ToolError::InvalidArgument("path names the repository root".to_string()));
    }

    match args.mode {
        Mode::Snapshot => {
            let snapshot = require_snapshot(workspace, args.snapshot_id).await?;
            let body = workspace
                .blocking(move |ws| {
                    let (entry, bytes) = ws.snapshots().resolve(&snapshot, &path)?;
                    let limit = ws.limits().max_file_bytes;
                    if bytes.len() as u64 > limit {
                        return Err(too_large(&path, bytes.len() as u64, limit));
                    }
                    Ok(file_body(path, bytes, entry.blob_hash, Some(snapshot.id.clone())))
                })
                .await?;
            respond(&body, Scope::Snapshot)
        }
        Mode::Worktree => {
            worktree_only(&args.snapshot_id)?;
            let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
            let bytes = {
                let path = path.clone();
                workspace.blocking(move |ws| read_live(ws, &path)).await?
            };
            lease.touch_with_parents(&path);
            let hash = content_address(&bytes);
            respond(&file_body(path, bytes, hash, None), Scope::Worktree(&lease))
        }
    }
}

#[derive(Debug, Serialize)]
struct LineMatch {
    line: usize,
    col: usize,
    text: String,
}

#[derive(Debug, Serialize)]
struct FileMatches {
    path: String,
    lines: Vec<LineMatch>,
}

#[derive(Debug, Serialize)]
struct GrepBody {
    pattern: String,
    case_insensitive: bool,
    matches: Vec<FileMatches>,
    truncated: bool,
    files_scanned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<String>,
}

/// Line-oriented matcher with a global match budget.
struct Searcher {
    regex: Regex,
    limit: usize,
    found: usize,
    truncated: bool,
    matches: Vec<FileMatches>,
    scanned: Vec<RepoPath>,
}

impl Searcher {
    fn new(pattern: &str, case_insensitive: bool, limit: usize) -> ToolResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| ToolError::InvalidArgument(format!("invalid pattern: {}", e)))?;
        Ok(Self {
            regex,
            limit,
            found: 0,
            truncated: false,
            matches: Vec::new(),
            scanned: Vec::new(),
        })
    }

    /// Binary content is not a candidate; everything else counts as scanned
    /// even once the budget is spent.
    fn scan(&mut self, path: &RepoPath, bytes: &[u8]) {
        if is_binary(bytes) {
            debug!("grep skips binary {}", path);
            return;
        }
        self.scanned.push(path.clone());
        if self.truncated {
            return;
        }
        let text = String::from_utf8_lossy(bytes);
        let mut lines = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let Some(m) = self.regex.find(line) else {
                continue;
            };
            if self.found == self.limit {
                self.truncated = true;
                break;
            }
            self.found += 1;
            lines.push(LineMatch {
                line: idx + 1,
                col: line[..m.start()].chars().count() + 1,
                text: line.to_string(),
            });
        }
        if !lines.is_empty() {
            self.matches.push(FileMatches {
                path: path.to_string(),
                lines,
            });
        }
    }
}

pub async fn grep(workspace: &Workspace, args: GrepArgs) -> ToolResult<Value> {
    let max = workspace.limits().max_grep_matches;
    let limit = args.max_matches.unwrap_or(max).min(max);
    let searcher = Searcher::new(&args.pattern, args.case_insensitive, limit)?;
    let mut roots = normalize_all(&args.paths)?;
    if roots.is_empty() {
        roots.push(RepoPath::root());
    }
    let pattern = args.pattern;
    let case_insensitive = args.case_insensitive;

    match args.mode {
        Mode::Snapshot => {
            let snapshot = require_snapshot(workspace, args.snapshot_id).await?;
            let snapshot_id = snapshot.id.clone();
            let searcher = workspace
                .blocking(move |ws| grep_snapshot(ws, &snapshot, &roots, searcher))
                .await?;
            let body = GrepBody {
                pattern,
                case_insensitive,
                files_scanned: searcher.scanned.len(),
                truncated: searcher.truncated,
                matches: searcher.matches,
                snapshot_id: Some(snapshot_id),
            };
            respond(&body, Scope::Snapshot)
        }
        Mode::Worktree => {
            worktree_only(&args.snapshot_id)?;
            let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
            let searcher = workspace
                .blocking(move |ws| grep_worktree(ws, &roots, searcher))
                .await?;
            for path in &searcher.scanned {
                lease.touch_with_parents(path);
            }
            let body = GrepBody {
                pattern,
                case_insensitive,
                files_scanned: searcher.scanned.len(),
                truncated: searcher.truncated,
                matches: searcher.matches,
                snapshot_id: None,
            };
            respond(&body, Scope::Worktree(&lease))
        }
    }
}

fn grep_worktree(workspace: &Workspace, roots: &[RepoPath], mut searcher: Searcher) -> ToolResult<Searcher> {
    let limit = workspace.limits().max_file_bytes;
    for path in collect_files(workspace.guard(), roots)? {
        let real = match workspace.guard().resolve_read(&path) {
            Ok(real) => real,
            Err(e) if e.code() == ErrorCode::NotFound => continue,
            Err(e) => return Err(e),
        };
        if let Some(bytes) = read_candidate(&path, &real, limit)? {
            searcher.scan(&path, &bytes);
        }
    }
    Ok(searcher)
}

fn read_candidate(path: &RepoPath, real: &Path, limit: u64) -> ToolResult<Option<Vec<u8>>> {
    match fs::metadata(real) {
        Ok(meta) if meta.len() > limit => {
            debug!("grep skips {} ({} bytes)", path, meta.len());
            return Ok(None);
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ToolError::io(path, e)),
    }
    match fs::read(real) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ToolError::io(path, e)),
    }
}

fn grep_snapshot(
    workspace: &Workspace,
    snapshot: &Snapshot,
    roots: &[RepoPath],
    mut searcher: Searcher,
) -> ToolResult<Searcher> {
    let mut candidates = BTreeMap::new();
    for root in roots {
        for entry in snapshot.manifest.files_under(root) {
            candidates.insert(entry.path.as_str(), entry.blob_hash.as_str());
        }
    }
    let limit = workspace.limits().max_file_bytes;
    let blobs = workspace.snapshots().blobs();
    for (path, hash) in candidates {
        if blobs.size(hash)?.unwrap_or(0) > limit {
            continue;
        }
        let bytes = blobs.load(hash)?;
        searcher.scan(&RepoPath::from_normalized(path.to_string()), &bytes);
    }
    Ok(searcher)
}

#[derive(Debug, Serialize)]
struct DiffBody {
    path: RepoPath,
    diff: String,
    files: Vec<Change>,
    from_snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<String>,
}

/// Git-style unified diff of one file; `None` when both sides are identical.
pub(crate) fn render_diff(path: &str, old: Option<&[u8]>, new: Option<&[u8]>) -> Option<String> {
    if old == new {
        return None;
    }
    let mut out = format!("diff --git a/{path} b/{path}\n");
    let (from, to) = match (old, new) {
        (None, _) => {
            out.push_str("new file mode 100644\n");
            ("/dev/null".to_string(), format!("b/{}", path))
        }
        (_, None) => {
            out.push_str("deleted file mode 100644\n");
            (format!("a/{}", path), "/dev/null".to_string())
        }
        _ => (format!("a/{}", path), format!("b/{}", path)),
    };
    if old.is_some_and(is_binary) || new.is_some_and(is_binary) {
        out.push_str(&format!("Binary files a/{path} and b/{path} differ\n"));
        return Some(out);
    }

    let old_text = String::from_utf8_lossy(old.unwrap_or_default());
    let new_text = String::from_utf8_lossy(new.unwrap_or_default());
    let diff = TextDiff::from_lines(old_text.as_ref(), new_text.as_ref());
    out.push_str(
        &diff
            .unified_diff()
            .context_radius(3)
            .header(&from, &to)
            .to_string(),
    );
    Some(out)
}

fn change_kind(old: Option<&[u8]>, new: Option<&[u8]>) -> ChangeKind {
    match (old, new) {
        (None, _) => ChangeKind::Added,
        (_, None) => ChangeKind::Deleted,
        _ => ChangeKind::Modified,
    }
}

pub async fn diff(workspace: &Workspace, args: DiffArgs) -> ToolResult<Value> {
    let scope = normalize(args.path.as_deref().unwrap_or(""))?;
    let base = match args.from_snapshot_id.clone() {
        Some(id) => Some(load_snapshot(workspace, id).await?),
        None => None,
    };

    match args.mode {
        Mode::Snapshot => {
            let target = require_snapshot(workspace, args.snapshot_id).await?;
            let from_snapshot_id = args.from_snapshot_id;
            let body = workspace
                .blocking(move |ws| {
                    let base_manifest = base.as_ref().map(|b| &b.manifest);
                    let captured = !target.manifest.files_under(&scope).is_empty()
                        || base_manifest.is_some_and(|m| !m.files_under(&scope).is_empty());
                    if !scope.is_root() && !captured {
                        return Err(ToolError::NotFound(format!("{} is not captured", scope)));
                    }

                    let blobs = ws.snapshots().blobs();
                    let mut text = String::new();
                    let mut files = Vec::new();
                    for change in changes(base_manifest, &target.manifest) {
                        let path = RepoPath::from_normalized(change.path.clone());
                        if path != scope && !path.is_under(&scope) {
                            continue;
                        }
                        let old = match base_manifest.and_then(|m| m.get(&change.path)) {
                            Some(entry) => Some(blobs.load(&entry.blob_hash)?),
                            None => None,
                        };
                        let new = match target.manifest.get(&change.path) {
                            Some(entry) => Some(blobs.load(&entry.blob_hash)?),
                            None => None,
                        };
                        if let Some(chunk) = render_diff(&change.path, old.as_deref(), new.as_deref()) {
                            text.push_str(&chunk);
                        }
                        files.push(change);
                    }
                    Ok(DiffBody {
                        path: scope,
                        diff: text,
                        files,
                        from_snapshot_id,
                        snapshot_id: Some(target.id.clone()),
                    })
                })
                .await?;
            respond(&body, Scope::Snapshot)
        }
        Mode::Worktree => {
            worktree_only(&args.snapshot_id)?;
            let base = base.ok_or_else(|| {
                ToolError::InvalidArgument("from_snapshot_id is required in worktree mode".to_string())
            })?;
            let mut lease = workspace.leases().acquire(args.lease_id.as_deref()).await?;
            let from_snapshot_id = args.from_snapshot_id;
            let (body, compared) = workspace
                .blocking(move |ws| diff_worktree(ws, &base, scope, from_snapshot_id))
                .await?;
            for path in &compared {
                lease.touch_with_parents(path);
            }
            respond(&body, Scope::Worktree(&lease))
        }
    }
}

/// Compare captured files under `scope` with their live versions.
fn diff_worktree(
    workspace: &Workspace,
    base: &Snapshot,
    scope: RepoPath,
    from_snapshot_id: Option<String>,
) -> ToolResult<(DiffBody, Vec<RepoPath>)> {
    let live = match collect_files(workspace.guard(), std::slice::from_ref(&scope)) {
        Ok(files) => files,
        Err(e) if e.code() == ErrorCode::NotFound => Vec::new(),
        Err(e) => return Err(e),
    };
    let mut compared: Vec<RepoPath> = base
        .manifest
        .files_under(&scope)
        .iter()
        .map(|e| RepoPath::from_normalized(e.path.clone()))
        .chain(live)
        .collect();
    compared.sort();
    compared.dedup();
    if compared.is_empty() {
        return Err(ToolError::NotFound(scope.to_string()));
    }

    let blobs = workspace.snapshots().blobs();
    let mut text = String::new();
    let mut files = Vec::new();
    for path in &compared {
        let old = match base.manifest.get(path.as_str()) {
            Some(entry) => Some(blobs.load(&entry.blob_hash)?),
            None => None,
        };
        let new = match read_live(workspace, path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e),
        };
        if let Some(chunk) = render_diff(path.as_str(), old.as_deref(), new.as_deref()) {
            text.push_str(&chunk);
            files.push(Change {
                path: path.to_string(),
                kind: change_kind(old.as_deref(), new.as_deref()),
            });
        }
    }
    let body = DiffBody {
        path: scope,
        diff: text,
        files,
        from_snapshot_id,
        snapshot_id: None,
    };
    Ok((body, compared))
}
