#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Added => write!(f, "added"),
            FileStatus::Deleted => write!(f, "deleted"),
            FileStatus::Modified => write!(f, "modified"),
            FileStatus::Renamed => write!(f, "renamed"),
        }
    }
}

/// A file that differs between two revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// Path in the target revision (the old path for deleted files)
    pub path: String,
    /// Path in the base revision when it differs (renames)
    pub old_path: Option<String>,
    pub status: FileStatus,
    /// Git reported the file as binary
    pub is_binary: bool,
    /// Lines added in this file
    pub additions: usize,
    /// Lines deleted in this file
    pub deletions: usize,
}

impl ChangedFile {
    pub fn new(path: &str, status: FileStatus) -> Self {
        Self {
            path: path.to_string(),
            old_path: None,
            status,
            is_binary: false,
            additions: 0,
            deletions: 0,
        }
    }

    /// Path to read in the base revision, if the file existed there.
    pub fn before_path(&self) -> Option<&str> {
        match self.status {
            FileStatus::Added => None,
            _ => Some(self.old_path.as_deref().unwrap_or(&self.path)),
        }
    }

    /// Path to read in the target revision, if the file exists there.
    pub fn after_path(&self) -> Option<&str> {
        match self.status {
            FileStatus::Deleted => None,
            _ => Some(&self.path),
        }
    }
}
