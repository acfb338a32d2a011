use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::guard::RepoPath;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub blob_hash: String,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>, blob_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blob_hash: blob_hash.into(),
        }
    }
}

/// One level of a manifest listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<'a> {
    File(&'a ManifestEntry),
    Dir(&'a str),
}

impl Node<'_> {
    pub fn path(&self) -> &str {
        match self {
            Node::File(entry) => &entry.path,
            Node::Dir(path) => path,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestRepr {
    entries: Vec<ManifestEntry>,
}

/// Sorted, path-unique list of captured files.
///
/// The directory index (every directory implied by a captured path, mapped
/// to its immediate subdirectories) is built once at construction, so
/// listings never rescan the entry list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ManifestRepr", into = "ManifestRepr")]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    subdirs: BTreeMap<String, BTreeSet<String>>,
}

impl From<ManifestRepr> for Manifest {
    fn from(repr: ManifestRepr) -> Self {
        Manifest::new(repr.entries)
    }
}

impl From<Manifest> for ManifestRepr {
    fn from(manifest: Manifest) -> Self {
        ManifestRepr {
            entries: manifest.entries,
        }
    }
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Manifest {}

impl Default for Manifest {
    fn default() -> Self {
        Manifest::new(Vec::new())
    }
}

impl Manifest {
    /// Sort by path; on duplicate paths the later entry wins.
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        let mut by_path = BTreeMap::new();
        for entry in entries {
            by_path.insert(entry.path.clone(), entry);
        }
        let entries: Vec<ManifestEntry> = by_path.into_values().collect();

        let mut subdirs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        subdirs.insert(String::new(), BTreeSet::new());
        for entry in &entries {
            let path = RepoPath::from_normalized(entry.path.clone());
            let mut child = path.parent();
            while let Some(dir) = child {
                if dir.is_root() {
                    break;
                }
                let parent = dir.parent().unwrap_or_else(RepoPath::root);
                subdirs.entry(dir.to_string()).or_default();
                subdirs
                    .entry(parent.to_string())
                    .or_default()
                    .insert(dir.to_string());
                child = Some(parent);
            }
        }
        Self { entries, subdirs }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// True for the root and for every directory implied by a captured path.
    pub fn is_dir(&self, path: &str) -> bool {
        self.subdirs.contains_key(path)
    }

    /// Immediate children of `dir`, sorted by path. Empty for an uncaptured subtree.
    pub fn children(&self, dir: &RepoPath) -> Vec<Node<'_>> {
        if !self.is_dir(dir.as_str()) {
            return Vec::new();
        }
        let mut nodes: Vec<Node<'_>> = self
            .subdirs
            .get(dir.as_str())
            .into_iter()
            .flatten()
            .map(|d| Node::Dir(d.as_str()))
            .collect();
        nodes.extend(
            self.files_under(dir)
                .iter()
                .filter(|e| {
                    let rest = if dir.is_root() {
                        e.path.as_str()
                    } else {
                        &e.path[dir.as_str().len() + 1..]
                    };
                    !rest.contains('/')
                })
                .map(Node::File),
        );
        nodes.sort_by(|a, b| a.path().cmp(b.path()));
        nodes
    }

    /// Every entry at or below `path`: the file itself, or the whole subtree of a directory.
    pub fn files_under(&self, path: &RepoPath) -> &[ManifestEntry] {
        if path.is_root() {
            return &self.entries;
        }
        if let Ok(idx) = self
            .entries
            .binary_search_by(|e| e.path.as_str().cmp(path.as_str()))
        {
            return &self.entries[idx..=idx];
        }
        let prefix = format!("{}/", path);
        // entries below `path/` are contiguous in byte order
        let start = self.entries.partition_point(|e| e.path.as_str() < prefix.as_str());
        let len = self.entries[start..]
            .iter()
            .take_while(|e| e.path.starts_with(&prefix))
            .count();
        &self.entries[start..start + len]
    }

    /// A copy with `changes` applied: `Some(hash)` sets a path, `None` removes it.
    pub fn with_changes(&self, changes: &BTreeMap<String, Option<String>>) -> Manifest {
        let mut by_path: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.path.clone(), e.blob_hash.clone()))
            .collect();
        for (path, hash) in changes {
            match hash {
                Some(hash) => {
                    by_path.insert(path.clone(), hash.clone());
                }
                None => {
                    by_path.remove(path);
                }
            }
        }
        Manifest::new(
            by_path
                .into_iter()
                .map(|(path, hash)| ManifestEntry::new(path, hash))
                .collect(),
        )
    }

    /// Keep only entries at or below one of `paths`.
    pub fn subset(&self, paths: &[RepoPath]) -> Manifest {
        let mut kept = Vec::new();
        for path in paths {
            kept.extend_from_slice(self.files_under(path));
        }
        Manifest::new(kept)
    }
}
