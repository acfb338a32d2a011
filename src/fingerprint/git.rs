//! `git` command-line implementation of the version-control probe.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, warn};

use super::VcsProbe;
use crate::error::{ToolError, ToolResult};

/// Exit status `git rev-parse --verify -q` uses for "no such revision".
const REV_NOT_FOUND: i32 = 1;

pub struct GitProbe {
    root: PathBuf,
}

impl GitProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn git(&self, args: &[&str]) -> ToolResult<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            // keep `git status` from refreshing (and locking) the index
            .env("GIT_OPTIONAL_LOCKS", "0")
            .output()
            .map_err(|e| ToolError::Internal(format!("failed to run git {}: {}", args.join(" "), e)))
    }
}

fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl VcsProbe for GitProbe {
    fn head_tree(&self) -> ToolResult<Option<String>> {
        let output = self.git(&["rev-parse", "--verify", "-q", "HEAD^{tree}"])?;
        if output.status.success() {
            return Ok(Some(stdout_line(&output)));
        }
        if output.status.code() == Some(REV_NOT_FOUND) {
            debug!("repository has no commits yet");
            return Ok(None);
        }
        Err(ToolError::Internal(format!(
            "git rev-parse failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }

    fn index_tree(&self) -> ToolResult<Option<String>> {
        let output = self.git(&["write-tree"])?;
        if output.status.success() {
            return Ok(Some(stdout_line(&output)));
        }
        // unmerged entries and similar: no tree can be built from the index
        warn!(
            "git write-tree produced no tree: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        Ok(None)
    }

    fn status_bytes(&self) -> ToolResult<Vec<u8>> {
        let output = self.git(&[
            "status",
            "--porcelain=v1",
            "-z",
            "--untracked-files=all",
            "--ignored=no",
        ])?;
        if !output.status.success() {
            return Err(ToolError::Internal(format!(
                "git status failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}
