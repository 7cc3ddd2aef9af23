use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueState::Open => write!(f, "open"),
            IssueState::Closed => write!(f, "closed"),
        }
    }
}

/// An issue linked to a TODO fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedIssue {
    /// Fingerprint stored in the issue body (None for issues found by reference only)
    pub fingerprint: Option<String>,
    /// Tracker-assigned number, never changes
    pub issue_id: u64,
    /// Browser URL, embedded into the source line
    pub url: String,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub assignee: Option<String>,
}

/// Request to open a new issue for a TODO.
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub fingerprint: String,
    pub title: String,
    pub body: String,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
}
