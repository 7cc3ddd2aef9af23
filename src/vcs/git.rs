use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{diff, ChangedFile, RevisionSource, VcsError};

/// Git's well-known empty tree, the base of a root commit.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Revision source backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_path: PathBuf,
}

impl GitCli {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, VcsError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(["-c", "core.quotepath=false"])
            .args(args)
            .output()
            .await?;
        Ok(output)
    }

    async fn run_ok(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(VcsError::Command {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolve `rev` to a full object id, `None` if it does not exist.
    async fn rev_parse(&self, rev: &str) -> Result<Option<String>, VcsError> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", rev]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }
}

/// Whether `git show rev:path` failed only because the path is absent.
fn is_missing_path(stderr: &str) -> bool {
    stderr.contains("does not exist in") || stderr.contains("exists on disk, but not in")
}

#[async_trait]
impl RevisionSource for GitCli {
    #[instrument(skip(self))]
    async fn changed_files(&self, base: &str, target: &str) -> Result<Vec<ChangedFile>, VcsError> {
        let raw = self
            .run_ok(&["diff", "--no-color", "--no-ext-diff", "-M", "--unified=0", base, target])
            .await?;
        debug!(diff_bytes = raw.len(), "received diff");
        let files = diff::parse_diff(&raw)?;
        debug!(
            files = files.len(),
            additions = files.iter().map(|f| f.additions).sum::<usize>(),
            deletions = files.iter().map(|f| f.deletions).sum::<usize>(),
            "parsed diff"
        );
        Ok(files)
    }

    async fn file_content(&self, rev: &str, path: &str) -> Result<Option<String>, VcsError> {
        let object = format!("{rev}:{path}");
        let output = self.run(&["show", &object]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_path(&stderr) {
                return Ok(None);
            }
            return Err(VcsError::Command {
                command: format!("show {object}"),
                stderr: stderr.trim().to_string(),
            });
        }
        match String::from_utf8(output.stdout) {
            Ok(text) => Ok(Some(text)),
            Err(_) => {
                debug!(path, rev, "skipping non-UTF-8 content");
                Ok(None)
            }
        }
    }

    async fn parent(&self, rev: &str) -> Result<String, VcsError> {
        if self.rev_parse(&format!("{rev}^{{commit}}")).await?.is_none() {
            return Err(VcsError::UnknownRevision(rev.to_string()));
        }
        Ok(self
            .rev_parse(&format!("{rev}^"))
            .await?
            .unwrap_or_else(|| EMPTY_TREE.to_string()))
    }

    async fn commit_author_email(&self, rev: &str) -> Result<Option<String>, VcsError> {
        let email = self.run_ok(&["log", "-1", "--format=%ae", rev]).await?;
        let email = email.trim();
        Ok((!email.is_empty()).then(|| email.to_string()))
    }
}
