//! Path normalization and containment checks.
//!
//! Every path a tool receives goes through [`normalize`] before anything
//! else happens, and through [`PathGuard`] before the filesystem is touched.
//! Violations are always `PERMISSION_DENIED`.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{ToolError, ToolResult};

/// Directory that no tool may read or write.
const VCS_DIR: &str = ".git";

/// A normalized, repository-relative, forward-slash path. The empty string is the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RepoPath(String);

impl RepoPath {
    pub fn root() -> Self {
        RepoPath(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<RepoPath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => RepoPath(self.0[..idx].to_string()),
            None => RepoPath::root(),
        })
    }

    /// Proper ancestors, nearest first, excluding the root.
    pub fn ancestors(&self) -> Vec<RepoPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(dir) = current {
            if dir.is_root() {
                break;
            }
            current = dir.parent();
            out.push(dir);
        }
        out
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn join(&self, name: &str) -> RepoPath {
        if self.is_root() {
            RepoPath(name.to_string())
        } else {
            RepoPath(format!("{}/{}", self.0, name))
        }
    }

    /// True when `self` lies strictly below directory `dir`.
    pub fn is_under(&self, dir: &RepoPath) -> bool {
        if dir.is_root() {
            return !self.is_root();
        }
        self.0.len() > dir.0.len()
            && self.0.starts_with(&dir.0)
            && self.0.as_bytes()[dir.0.len()] == b'/'
    }

    /// Treat an already-normalized string (e.g. a manifest key) as a path.
    pub(crate) fn from_normalized(raw: String) -> Self {
        RepoPath(raw)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn denied(raw: &str, why: &str) -> ToolError {
    ToolError::PermissionDenied(format!("{:?}: {}", raw, why))
}

/// Normalize a client-supplied path.
pub fn normalize(raw: &str) -> ToolResult<RepoPath> {
    if raw.contains('\0') || raw.contains('\\') {
        return Err(denied(raw, "invalid character in path"));
    }
    if raw.starts_with('/') {
        return Err(denied(raw, "absolute paths are not allowed"));
    }
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(denied(raw, "drive-qualified paths are not allowed"));
    }

    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(denied(raw, "parent-directory segments are not allowed")),
            VCS_DIR => return Err(denied(raw, "version-control metadata is off limits")),
            other => segments.push(other),
        }
    }
    Ok(RepoPath(segments.join("/")))
}

/// Normalize a list of paths, returning them sorted and deduplicated.
pub fn normalize_all<S: AsRef<str>>(raw: &[S]) -> ToolResult<Vec<RepoPath>> {
    let mut paths = raw
        .iter()
        .map(|p| normalize(p.as_ref()))
        .collect::<ToolResult<Vec<_>>>()?;
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Resolves repository paths against a canonical root and refuses escapes.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: &Path) -> ToolResult<Self> {
        let root = root
            .canonicalize()
            .map_err(|e| ToolError::io(root.display(), e))?;
        Ok(Self { root })
    }

    /// Canonical repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unresolved on-disk location of `path`.
    pub fn join(&self, path: &RepoPath) -> PathBuf {
        if path.is_root() {
            self.root.clone()
        } else {
            self.root.join(path.as_str())
        }
    }

    /// Resolve an existing path for reading. Missing targets are `NOT_FOUND`
    /// once the nearest existing ancestor is known to be inside the root.
    pub fn resolve_read(&self, path: &RepoPath) -> ToolResult<PathBuf> {
        let joined = self.join(path);
        match joined.canonicalize() {
            Ok(real) => self.contain(path, real),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if fs::symlink_metadata(&joined).is_ok() {
                    return Err(denied(path.as_str(), "dangling symlink"));
                }
                self.resolve_missing(path)?;
                Err(ToolError::NotFound(path.to_string()))
            }
            Err(err) => Err(ToolError::io(path, err)),
        }
    }

    /// Resolve a target for writing or deleting. When the target does not
    /// exist the nearest existing ancestor is canonicalized instead.
    pub fn resolve_write(&self, path: &RepoPath) -> ToolResult<PathBuf> {
        if path.is_root() {
            return Err(denied("", "the repository root is not a writable target"));
        }
        let joined = self.join(path);
        match fs::symlink_metadata(&joined) {
            Ok(_) => match joined.canonicalize() {
                Ok(real) => self.contain(path, real),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(denied(path.as_str(), "dangling symlink"))
                }
                Err(err) => Err(ToolError::io(path, err)),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => self.resolve_missing(path),
            Err(err) => Err(ToolError::io(path, err)),
        }
    }

    fn resolve_missing(&self, path: &RepoPath) -> ToolResult<PathBuf> {
        let mut missing = vec![path.file_name().to_string()];
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            let joined = self.join(&dir);
            match fs::symlink_metadata(&joined) {
                Ok(_) => {
                    let real = joined.canonicalize().map_err(|err| {
                        if err.kind() == io::ErrorKind::NotFound {
                            denied(path.as_str(), "dangling symlink in parent")
                        } else {
                            ToolError::io(&dir, err)
                        }
                    })?;
                    let mut real = self.contain(path, real)?;
                    for segment in missing.iter().rev() {
                        real.push(segment);
                    }
                    return Ok(real);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    missing.push(dir.file_name().to_string());
                    ancestor = dir.parent();
                }
                Err(err) => return Err(ToolError::io(&dir, err)),
            }
        }
        // the root itself always exists
        Ok(self.root.join(path.as_str()))
    }

    fn contain(&self, path: &RepoPath, real: PathBuf) -> ToolResult<PathBuf> {
        let rel = real
            .strip_prefix(&self.root)
            .map_err(|_| denied(path.as_str(), "resolves outside the repository"))?;
        if let Some(Component::Normal(first)) = rel.components().next() {
            if first == VCS_DIR {
                return Err(denied(path.as_str(), "resolves into version-control metadata"));
            }
        }
        Ok(real)
    }
}
