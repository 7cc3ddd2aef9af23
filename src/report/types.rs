use crate::classify::Classification;
use crate::reconcile::FingerprintOutcome;

/// Severity of a finding or of the run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "OK"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A non-fatal problem noticed during the run.
#[derive(Debug, Clone)]
pub struct Finding {
    /// Human-readable description of the finding
    pub message: String,
    /// File path the finding refers to (if applicable)
    pub file: Option<String>,
    /// Line number in the file (if applicable)
    pub line: Option<usize>,
    pub severity: Severity,
}

impl Finding {
    pub fn warning(message: impl Into<String>, file: Option<&str>, line: Option<usize>) -> Self {
        Self {
            message: message.into(),
            file: file.map(str::to_string),
            line,
            severity: Severity::Warning,
        }
    }

    pub fn error(message: impl Into<String>, file: Option<&str>, line: Option<usize>) -> Self {
        Self {
            severity: Severity::Error,
            ..Self::warning(message, file, line)
        }
    }
}

/// Number of TODOs per classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TodoCounts {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub modified: usize,
}

impl From<&Classification> for TodoCounts {
    fn from(classification: &Classification) -> Self {
        Self {
            added: classification.added.len(),
            removed: classification.removed.len(),
            unchanged: classification.unchanged.len(),
            modified: classification.modified.len(),
        }
    }
}

/// What the run looked at.
#[derive(Debug, Clone)]
pub struct RunInfo {
    /// "commit" or "backfill"
    pub mode: String,
    pub base: String,
    pub target: String,
    pub dry_run: bool,
    /// Files in the diff
    pub files_changed: usize,
    /// Files with a known comment syntax that were scanned
    pub files_scanned: usize,
    pub counts: TodoCounts,
    /// Source lines rewritten with an issue reference
    pub annotations_written: usize,
    /// Lines that would be rewritten with --write
    pub annotations_pending: usize,
}

/// Complete report of one reconciliation run.
#[derive(Debug)]
pub struct RunReport {
    pub info: RunInfo,
    /// One entry per added, modified or removed TODO
    pub outcomes: Vec<FingerprintOutcome>,
    pub findings: Vec<Finding>,
    /// Highest severity across findings and outcomes
    pub overall: Severity,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.overall == Severity::Error
    }

    /// 0 on full success, 1 if anything failed.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_failures())
    }
}
