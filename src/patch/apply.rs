use serde::Serialize;

use super::parse::{FileOp, FilePatch, Hunk};

/// Closed set of reasons a hunk can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    ContextMismatch,
    TargetMissing,
    AlreadyModified,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Reject {
    pub path: String,
    pub hunk_index: usize,
    pub reason: RejectReason,
}

/// Result of running one file section against the current bytes.
#[derive(Debug)]
pub struct FileOutcome {
    /// New content, `None` when the file ends up deleted.
    pub content: Option<Vec<u8>>,
    pub applied_hunks: usize,
    pub rejects: Vec<Reject>,
}

impl FileOutcome {
    fn refuse_all(patch: &FilePatch, reason: RejectReason) -> Self {
        Self {
            content: None,
            applied_hunks: 0,
            rejects: (0..patch.hunks.len())
                .map(|idx| Reject {
                    path: patch.path.to_string(),
                    hunk_index: idx,
                    reason,
                })
                .collect(),
        }
    }
}

fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes
        .split_inclusive(|b| *b == b'\n')
        .map(<[u8]>::to_vec)
        .collect()
}

fn matches_at(lines: &[Vec<u8>], pos: usize, hunk: &Hunk) -> bool {
    let expected: Vec<&str> = hunk.old_lines().collect();
    if pos.checked_add(expected.len()).map_or(true, |end| end > lines.len()) {
        return false;
    }
    expected
        .iter()
        .zip(&lines[pos..])
        .all(|(want, have)| want.as_bytes() == have.as_slice())
}

/// Apply hunks positionally and byte-for-byte. A hunk that does not match
/// exactly at its stated position is rejected; later hunks still run, with
/// positions shifted only by the hunks that did apply.
pub fn apply_file(patch: &FilePatch, current: Option<&[u8]>) -> FileOutcome {
    let mut lines = match (patch.op, current) {
        (FileOp::Create, Some(_)) => {
            return FileOutcome::refuse_all(patch, RejectReason::ContextMismatch)
        }
        (FileOp::Create, None) => Vec::new(),
        (FileOp::Modify | FileOp::Delete, None) => {
            return FileOutcome::refuse_all(patch, RejectReason::TargetMissing)
        }
        (FileOp::Modify | FileOp::Delete, Some(bytes)) => split_lines(bytes),
    };

    let mut rejects = Vec::new();
    let mut applied_hunks = 0;
    let mut delta: isize = 0;
    let mut covered_to = 0usize;

    for (idx, hunk) in patch.hunks.iter().enumerate() {
        let reject = |reason| Reject {
            path: patch.path.to_string(),
            hunk_index: idx,
            reason,
        };
        let anchor = hunk.anchor();
        let old_count = hunk.old_lines().count();
        if idx > 0 && anchor < covered_to {
            rejects.push(reject(RejectReason::AlreadyModified));
            continue;
        }
        covered_to = anchor.saturating_add(old_count);

        let pos = anchor as isize + delta;
        if pos < 0 || !matches_at(&lines, pos as usize, hunk) {
            rejects.push(reject(RejectReason::ContextMismatch));
            continue;
        }
        let pos = pos as usize;
        let replacement: Vec<Vec<u8>> = hunk.new_lines().map(|l| l.as_bytes().to_vec()).collect();
        delta += replacement.len() as isize - old_count as isize;
        lines.splice(pos..pos + old_count, replacement);
        applied_hunks += 1;
    }

    let content: Vec<u8> = lines.concat();
    let deleted = patch.op == FileOp::Delete && rejects.is_empty();
    if deleted && !content.is_empty() {
        // the deletion did not account for every line of the file
        let last = patch.hunks.len().saturating_sub(1);
        return FileOutcome {
            content: Some(content),
            applied_hunks: 0,
            rejects: vec![Reject {
                path: patch.path.to_string(),
                hunk_index: last,
                reason: RejectReason::ContextMismatch,
            }],
        };
    }

    FileOutcome {
        content: if deleted { None } else { Some(content) },
        applied_hunks,
        rejects,
    }
}
