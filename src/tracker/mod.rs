pub mod github;
pub mod memory;
pub mod types;

pub use types::{IssueState, NewIssue, TrackedIssue};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::scan::TodoMarker;

const FINGERPRINT_TAG: &str = "todo-fingerprint:";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Issue tracker unreachable: {0}")]
    Unreachable(String),

    #[error("Issue tracker rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Issue tracker server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Issue tracker rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Issue #{0} not found")]
    NotFound(u64),

    #[error("Missing tracker setting: {0}")]
    Misconfigured(String),
}

impl TrackerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TrackerError::Unreachable(_) | TrackerError::RateLimited { .. } | TrackerError::Server { .. }
        )
    }

    /// Server-provided wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TrackerError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_server_error() => TrackerError::Server {
                status: status.as_u16(),
                message: err.to_string(),
            },
            Some(status) => TrackerError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => TrackerError::Unreachable(err.to_string()),
        }
    }
}

/// Issue tracker holding the fingerprint-to-issue mapping.
///
/// The tracker is the system of record: fingerprints live in issue bodies
/// and are looked up on every run.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Find the issue carrying this fingerprint, open or closed.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<TrackedIssue>, TrackerError>;

    /// Fetch an issue by number; `None` when it does not exist.
    async fn get_issue(&self, issue_id: u64) -> Result<Option<TrackedIssue>, TrackerError>;

    async fn create_issue(&self, issue: NewIssue) -> Result<TrackedIssue, TrackerError>;

    async fn close_issue(&self, issue_id: u64) -> Result<(), TrackerError>;

    async fn reopen_issue(&self, issue_id: u64) -> Result<(), TrackerError>;

    async fn update_issue(&self, issue_id: u64, title: &str, body: &str) -> Result<(), TrackerError>;

    /// Whether `login` can be assigned issues in this tracker.
    async fn is_assignable(&self, login: &str) -> Result<bool, TrackerError>;

    /// Issue number behind `issue_ref` when the link points into this
    /// tracker; `None` for links to other repositories or hosts.
    fn issue_id_for_ref(&self, issue_ref: &str) -> Option<u64>;
}

/// Issue body for a TODO: its body lines, its location and the hidden
/// fingerprint tag.
pub fn render_body(marker: &TodoMarker) -> String {
    let mut body = String::new();
    if !marker.body.is_empty() {
        body.push_str(&marker.body.join("\n"));
        body.push_str("\n\n");
    }
    body.push_str(&format!("Found in `{}`.\n\n", marker.location()));
    body.push_str(&format!("<!-- {} {} -->", FINGERPRINT_TAG, marker.fingerprint));
    body
}

/// Fingerprint tag embedded in an issue body, if any.
pub fn parse_fingerprint(body: &str) -> Option<&str> {
    let start = body.find(FINGERPRINT_TAG)? + FINGERPRINT_TAG.len();
    let rest = body[start..].trim_start();
    let end = rest.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// Issue number of a reference like `https://host/o/r/issues/42`, provided
/// it lives under `repo_url` (compared case-insensitively).
pub fn issue_number_under(repo_url: &str, issue_ref: &str) -> Option<u64> {
    let prefix = format!("{}/issues/", repo_url.trim_end_matches('/'));
    let head = issue_ref.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(&prefix) {
        return None;
    }
    let number = issue_ref[prefix.len()..].split('#').next()?.trim_end_matches('/');
    number.parse().ok()
}
