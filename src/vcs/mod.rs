pub mod diff;
pub mod git;
#[cfg(test)]
pub mod memory;
pub mod types;

pub use types::{ChangedFile, FileStatus};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("`git {command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Failed to parse diff: {0}")]
    DiffParse(String),

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),
}

/// Source of the two revisions being reconciled.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// Files that differ between `base` and `target`.
    async fn changed_files(&self, base: &str, target: &str) -> Result<Vec<ChangedFile>, VcsError>;

    /// Text content of `path` at `rev`; `None` if the file does not exist
    /// there or is not UTF-8.
    async fn file_content(&self, rev: &str, path: &str) -> Result<Option<String>, VcsError>;

    /// Revision to diff a single commit against (the empty tree for a root commit).
    async fn parent(&self, rev: &str) -> Result<String, VcsError>;

    /// Email address of the author of the commit at `rev`.
    async fn commit_author_email(&self, rev: &str) -> Result<Option<String>, VcsError>;
}
