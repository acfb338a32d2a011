use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Find the git root directory by searching upward from `start`.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut path = start;

    loop {
        if path.join(".git").exists() {
            return Some(path.to_path_buf());
        }
        path = path.parent()?;
    }
}

/// Resolve the repository root the server operates on.
pub fn resolve_repo_root(repo_root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match repo_root {
        Some(path) => path,
        None => {
            let current = std::env::current_dir().context("Failed to get current directory")?;
            find_git_root(&current).unwrap_or(current)
        }
    };
    root.canonicalize()
        .with_context(|| format!("Failed to canonicalize repository root: {}", root.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::GitRepo;

    #[test]
    fn test_find_git_root_walks_upward() {
        let repo = GitRepo::with_hello();
        repo.write("deep/nested/file.txt", "x");
        let found = find_git_root(&repo.abs("deep/nested")).unwrap();
        assert_eq!(found, repo.path());
    }

    #[test]
    fn test_explicit_root_must_exist() {
        let repo = GitRepo::init();
        assert!(resolve_repo_root(Some(repo.abs("missing"))).is_err());
        let resolved = resolve_repo_root(Some(repo.path().to_path_buf())).unwrap();
        assert_eq!(resolved, repo.path().canonicalize().unwrap());
    }
}
