use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use super::{ChangedFile, FileStatus, RevisionSource, VcsError};

/// Revision source over hand-built snapshots.
#[derive(Debug, Default)]
pub struct MemorySource {
    revisions: Mutex<HashMap<String, BTreeMap<String, String>>>,
    parents: Mutex<HashMap<String, String>>,
    author_emails: Mutex<HashMap<String, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `rev` with the given files, its parent and author email.
    pub fn commit(&self, rev: &str, parent: &str, author_email: &str, files: &[(&str, &str)]) {
        let snapshot = files
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect();
        self.revisions.lock().unwrap().insert(rev.to_string(), snapshot);
        self.parents.lock().unwrap().insert(rev.to_string(), parent.to_string());
        self.author_emails
            .lock()
            .unwrap()
            .insert(rev.to_string(), author_email.to_string());
    }

    fn snapshot(&self, rev: &str) -> Result<BTreeMap<String, String>, VcsError> {
        let revisions = self.revisions.lock().unwrap();
        match revisions.get(rev) {
            Some(files) => Ok(files.clone()),
            // an unrecorded base is treated as the empty tree
            None if rev == super::git::EMPTY_TREE => Ok(BTreeMap::new()),
            None => Err(VcsError::UnknownRevision(rev.to_string())),
        }
    }
}

#[async_trait]
impl RevisionSource for MemorySource {
    async fn changed_files(&self, base: &str, target: &str) -> Result<Vec<ChangedFile>, VcsError> {
        let before = self.snapshot(base)?;
        let after = self.snapshot(target)?;
        let paths: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

        Ok(paths
            .into_iter()
            .filter_map(|path| match (before.get(path), after.get(path)) {
                (None, Some(_)) => Some(ChangedFile::new(path, FileStatus::Added)),
                (Some(_), None) => Some(ChangedFile::new(path, FileStatus::Deleted)),
                (Some(old), Some(new)) if old != new => Some(ChangedFile::new(path, FileStatus::Modified)),
                _ => None,
            })
            .collect())
    }

    async fn file_content(&self, rev: &str, path: &str) -> Result<Option<String>, VcsError> {
        Ok(self.snapshot(rev)?.get(path).cloned())
    }

    async fn parent(&self, rev: &str) -> Result<String, VcsError> {
        self.snapshot(rev)?;
        Ok(self
            .parents
            .lock()
            .unwrap()
            .get(rev)
            .cloned()
            .unwrap_or_else(|| super::git::EMPTY_TREE.to_string()))
    }

    async fn commit_author_email(&self, rev: &str) -> Result<Option<String>, VcsError> {
        Ok(self.author_emails.lock().unwrap().get(rev).cloned())
    }
}
