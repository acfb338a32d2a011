//! Unified diff parser.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ToolError, ToolResult};
use crate::guard::{normalize, RepoPath};

const DEV_NULL: &str = "/dev/null";
const NO_NEWLINE_MARKER: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Context(String),
    Remove(String),
    Add(String),
}

/// Lines keep their `\n` terminator unless marked "No newline at end of file".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// Bytes the target must contain at the hunk position.
    pub fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            Line::Context(s) | Line::Remove(s) => Some(s.as_str()),
            Line::Add(_) => None,
        })
    }

    pub fn new_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            Line::Context(s) | Line::Add(s) => Some(s.as_str()),
            Line::Remove(_) => None,
        })
    }

    /// Zero-based index of the first target line the hunk covers.
    pub fn anchor(&self) -> usize {
        if self.old_len == 0 {
            // pure insertion: "-k,0" inserts after line k
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }
}

/// Header paths as written, before prefix stripping. `None` is `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFilePatch {
    pub old: Option<String>,
    pub new: Option<String>,
    pub hunks: Vec<Hunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Modify,
    Delete,
}

/// A file section with its target resolved to a repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub path: RepoPath,
    pub op: FileOp,
    pub hunks: Vec<Hunk>,
}

fn hunk_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap_or_else(|e| {
            unreachable!("hunk header pattern is valid: {}", e)
        })
    })
}

/// Hunk ranges ending past this line number are rejected as malformed.
const MAX_LINE_NUMBER: usize = u32::MAX as usize;

fn invalid(msg: impl Into<String>) -> ToolError {
    ToolError::InvalidArgument(format!("malformed patch: {}", msg.into()))
}

fn header_path(line: &str, marker: &str) -> Option<String> {
    let rest = line.strip_prefix(marker)?;
    let rest = rest.trim_end_matches(['\n', '\r']);
    // drop a trailing "\t<timestamp>"
    let path = rest.split('\t').next().unwrap_or(rest);
    if path == DEV_NULL {
        None
    } else {
        Some(path.to_string())
    }
}

fn number(raw: Option<regex::Match<'_>>, default: usize) -> ToolResult<usize> {
    match raw {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| invalid(format!("bad hunk range {}", m.as_str()))),
        None => Ok(default),
    }
}

/// Split a patch into per-file sections.
pub fn parse(patch: &str) -> ToolResult<Vec<RawFilePatch>> {
    let lines: Vec<&str> = patch.split_inclusive('\n').collect();
    let mut files = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if !line.starts_with("--- ") {
            // "diff --git", "index", mode lines and free text between sections
            i += 1;
            continue;
        }
        let old = header_path(line, "--- ");
        let new = lines
            .get(i + 1)
            .filter(|l| l.starts_with("+++ "))
            .ok_or_else(|| invalid(format!("'---' header without '+++' at line {}", i + 1)))?;
        let new = header_path(new, "+++ ");
        if old.is_none() && new.is_none() {
            return Err(invalid("both sides are /dev/null"));
        }
        i += 2;

        let mut hunks = Vec::new();
        while i < lines.len() && lines[i].starts_with("@@") {
            let (hunk, next) = parse_hunk(&lines, i)?;
            hunks.push(hunk);
            i = next;
        }
        if hunks.is_empty() {
            return Err(invalid(format!("file section for {:?} has no hunks", new.as_ref().or(old.as_ref()))));
        }
        files.push(RawFilePatch { old, new, hunks });
    }

    if files.is_empty() {
        return Err(invalid("no file sections found"));
    }
    Ok(files)
}

fn parse_hunk(lines: &[&str], start: usize) -> ToolResult<(Hunk, usize)> {
    let header = lines[start];
    let caps = hunk_header()
        .captures(header)
        .ok_or_else(|| invalid(format!("bad hunk header {:?}", header.trim_end())))?;
    let mut hunk = Hunk {
        old_start: number(caps.get(1), 0)?,
        old_len: number(caps.get(2), 1)?,
        new_start: number(caps.get(3), 0)?,
        new_len: number(caps.get(4), 1)?,
        lines: Vec::new(),
    };
    for (start, len) in [(hunk.old_start, hunk.old_len), (hunk.new_start, hunk.new_len)] {
        if start.checked_add(len).map_or(true, |end| end > MAX_LINE_NUMBER) {
            return Err(invalid(format!("hunk range out of bounds in {:?}", header.trim_end())));
        }
    }

    let (mut old_left, mut new_left) = (hunk.old_len, hunk.new_len);
    let mut i = start + 1;
    while old_left > 0 || new_left > 0 {
        let raw = lines
            .get(i)
            .ok_or_else(|| invalid(format!("hunk at line {} ends early", start + 1)))?;
        i += 1;
        if raw.starts_with(NO_NEWLINE_MARKER) {
            strip_last_newline(&mut hunk)?;
            continue;
        }
        // some editors drop the single space of an empty context line
        let (tag, body) = if *raw == "\n" {
            (' ', "\n")
        } else {
            let mut chars = raw.chars();
            let tag = chars.next().unwrap_or(' ');
            (tag, chars.as_str())
        };
        match tag {
            ' ' if old_left > 0 && new_left > 0 => {
                old_left -= 1;
                new_left -= 1;
                hunk.lines.push(Line::Context(body.to_string()));
            }
            '-' if old_left > 0 => {
                old_left -= 1;
                hunk.lines.push(Line::Remove(body.to_string()));
            }
            '+' if new_left > 0 => {
                new_left -= 1;
                hunk.lines.push(Line::Add(body.to_string()));
            }
            _ => {
                return Err(invalid(format!(
                    "unexpected line {:?} in hunk at line {}",
                    raw.trim_end(),
                    start + 1
                )))
            }
        }
    }
    if lines.get(i).is_some_and(|l| l.starts_with(NO_NEWLINE_MARKER)) {
        strip_last_newline(&mut hunk)?;
        i += 1;
    }
    Ok((hunk, i))
}

fn strip_last_newline(hunk: &mut Hunk) -> ToolResult<()> {
    let last = match hunk.lines.last_mut() {
        Some(Line::Context(s)) | Some(Line::Remove(s)) | Some(Line::Add(s)) => s,
        None => return Err(invalid("'\\ No newline' marker before any line")),
    };
    if last.ends_with('\n') {
        last.pop();
    }
    Ok(())
}

/// Strip one leading component when every header carries the `a/`/`b/`
/// prefixes, none otherwise.
pub fn default_strip(files: &[RawFilePatch]) -> usize {
    let prefixed = files.iter().all(|f| {
        f.old.as_deref().map_or(true, |p| p.starts_with("a/"))
            && f.new.as_deref().map_or(true, |p| p.starts_with("b/"))
    });
    usize::from(prefixed)
}

fn strip_components(raw: &str, strip: usize) -> ToolResult<RepoPath> {
    let mut parts = raw.splitn(strip + 1, '/');
    let rest = parts
        .nth(strip)
        .ok_or_else(|| invalid(format!("cannot strip {} components from {:?}", strip, raw)))?;
    let path = normalize(rest)?;
    if path.is_root() {
        return Err(invalid(format!("header {:?} names no file", raw)));
    }
    Ok(path)
}

/// Resolve header paths into targets. Every path passes through `normalize`,
/// so an escaping header fails with `PERMISSION_DENIED`.
pub fn resolve(files: Vec<RawFilePatch>, strip: usize) -> ToolResult<Vec<FilePatch>> {
    files
        .into_iter()
        .map(|f| {
            let old = f.old.as_deref().map(|p| strip_components(p, strip)).transpose()?;
            let new = f.new.as_deref().map(|p| strip_components(p, strip)).transpose()?;
            let (path, op) = match (old, new) {
                (None, Some(new)) => (new, FileOp::Create),
                (Some(old), None) => (old, FileOp::Delete),
                (Some(old), Some(new)) if old == new => (new, FileOp::Modify),
                (Some(old), Some(new)) => {
                    return Err(ToolError::InvalidArgument(format!(
                        "renames are not supported ({} -> {})",
                        old, new
                    )))
                }
                (None, None) => return Err(invalid("both sides are /dev/null")),
            };
            Ok(FilePatch {
                path,
                op,
                hunks: f.hunks,
            })
        })
        .collect()
}
