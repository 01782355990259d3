use crate::error::CheckpointError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Thin wrapper over the `git` binary, rooted at a working tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Locate the repository containing `dir`. `None` when git is not
    /// installed or `dir` is not inside a working tree.
    pub async fn detect(dir: &Path) -> Option<Self> {
        let version = Command::new("git")
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !version.status.success() {
            return None;
        }

        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Some(Self {
            root: PathBuf::from(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a git command, returning stdout. Non-zero exit is an error
    /// carrying the command line and stderr.
    pub async fn run(&self, args: &[&str]) -> Result<String, CheckpointError> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(CheckpointError::Git {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Like [`GitRepo::run`] but reports failure as `None`.
    async fn try_run(&self, args: &[&str]) -> Option<String> {
        self.run(args).await.ok().map(|out| out.trim().to_string())
    }

    pub async fn head(&self) -> Result<String, CheckpointError> {
        Ok(self.run(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    /// Current branch name, `None` when HEAD is detached.
    pub async fn current_branch(&self) -> Result<Option<String>, CheckpointError> {
        let name = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let name = name.trim();
        Ok((name != "HEAD").then(|| name.to_string()))
    }

    pub async fn resolve(&self, rev: &str) -> Option<String> {
        self.try_run(&["rev-parse", "-q", "--verify", rev]).await
    }

    pub async fn git_dir(&self) -> Result<PathBuf, CheckpointError> {
        let dir = self.run(&["rev-parse", "--absolute-git-dir"]).await?;
        Ok(PathBuf::from(dir.trim()))
    }

    /// Paths with modified, staged or untracked content, relative to the
    /// repository root.
    pub async fn changed_paths(&self) -> Result<Vec<String>, CheckpointError> {
        let status = self.run(&["status", "--porcelain", "-z", "--untracked-files=all"]).await?;
        Ok(parse_porcelain_z(&status))
    }

    pub async fn is_dirty(&self) -> Result<bool, CheckpointError> {
        Ok(!self.changed_paths().await?.is_empty())
    }

    /// Stash tracked and untracked changes, optionally limited to `paths`.
    /// Returns the stash commit, or `None` when there was nothing to stash.
    pub async fn stash_push(&self, message: &str, paths: &[String]) -> Result<Option<String>, CheckpointError> {
        let before = self.resolve("refs/stash").await;

        let mut args = vec!["stash", "push", "--include-untracked", "-m", message];
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.run(&args).await?;

        let after = self.resolve("refs/stash").await;
        Ok(match after {
            Some(sha) if Some(&sha) != before.as_ref() => Some(sha),
            _ => None,
        })
    }

    pub async fn stash_pop(&self) -> Result<(), CheckpointError> {
        self.run(&["stash", "pop", "--index", "-q"]).await.map(|_| ())
    }

    pub async fn create_branch(&self, name: &str, start: &str) -> Result<(), CheckpointError> {
        self.run(&["branch", name, start]).await.map(|_| ())
    }

    pub async fn delete_branch(&self, name: &str) -> Result<(), CheckpointError> {
        self.run(&["branch", "-D", name]).await.map(|_| ())
    }

    pub async fn checkout(&self, name: &str) -> Result<(), CheckpointError> {
        self.run(&["checkout", "-q", name]).await.map(|_| ())
    }

    pub async fn diff(&self, from: &str, to: &str) -> Result<String, CheckpointError> {
        self.run(&["diff", "--binary", from, to]).await
    }

    pub async fn apply_three_way(&self, patch: &Path) -> Result<(), CheckpointError> {
        let patch = patch.to_string_lossy();
        self.run(&["apply", "--3way", patch.as_ref()]).await.map(|_| ())
    }

    /// Write every file of `rev`'s tree into the working tree.
    pub async fn checkout_tree(&self, rev: &str) -> Result<(), CheckpointError> {
        self.run(&["checkout", rev, "--", "."]).await.map(|_| ())
    }

    /// Unstage everything, keeping working tree contents.
    pub async fn reset_index(&self) -> Result<(), CheckpointError> {
        self.run(&["reset", "-q"]).await.map(|_| ())
    }
}

/// Parse `git status --porcelain -z`. Entries are NUL separated and never
/// quoted; a rename or copy is followed by an extra entry holding the
/// source path.
fn parse_porcelain_z(status: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut entries = status.split('\0');
    while let Some(entry) = entries.next() {
        if entry.len() <= 3 {
            continue;
        }
        let (code, path) = entry.split_at(3);
        paths.push(path.to_string());
        if code.starts_with('R') || code.starts_with('C') {
            entries.next();
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain_z() {
        let status = " M src/a.rs\0R  new name.txt\0old name.txt\0?? caf\u{e9}.txt\0";
        assert_eq!(
            parse_porcelain_z(status),
            vec!["src/a.rs".to_string(), "new name.txt".to_string(), "caf\u{e9}.txt".to_string()]
        );
        assert!(parse_porcelain_z("").is_empty());
    }
}
