use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;

use super::{issue_number_under, parse_fingerprint, IssueState, IssueTracker, NewIssue, TrackedIssue, TrackerError};

#[derive(Debug, Default)]
struct MemoryState {
    issues: Vec<TrackedIssue>,
    next_id: u64,
    /// Calls left to fail, and whether those failures are transient
    failures: Option<(usize, bool)>,
    /// None accepts every login
    assignable: Option<HashSet<String>>,
    calls: usize,
}

/// Issue tracker kept in memory, used for dry runs and tests.
#[derive(Debug)]
pub struct InMemoryTracker {
    base_url: String,
    state: Mutex<MemoryState>,
}

impl InMemoryTracker {
    /// Issues get URLs of the form `{base_url}/issues/{id}`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
        }
    }

    /// Seed an existing issue, e.g. one created by an earlier run.
    #[cfg(test)]
    pub async fn insert(&self, issue_id: u64, title: &str, body: &str, state: IssueState) -> TrackedIssue {
        let issue = TrackedIssue {
            fingerprint: parse_fingerprint(body).map(str::to_string),
            issue_id,
            url: format!("{}/issues/{}", self.base_url, issue_id),
            title: title.to_string(),
            body: body.to_string(),
            state,
            assignee: None,
        };
        let mut guard = self.state.lock().await;
        guard.next_id = guard.next_id.max(issue_id + 1);
        guard.issues.push(issue.clone());
        issue
    }

    /// Fail the next `count` calls with a transient or permanent error.
    #[cfg(test)]
    pub async fn fail_next(&self, count: usize, transient: bool) {
        self.state.lock().await.failures = Some((count, transient));
    }

    /// Only accept these logins as assignees.
    #[cfg(test)]
    pub async fn restrict_assignees(&self, logins: &[&str]) {
        self.state.lock().await.assignable = Some(logins.iter().map(|l| l.to_string()).collect());
    }

    #[cfg(test)]
    pub async fn issues(&self) -> Vec<TrackedIssue> {
        self.state.lock().await.issues.clone()
    }

    #[cfg(test)]
    pub async fn calls(&self) -> usize {
        self.state.lock().await.calls
    }

    async fn begin_call(&self) -> Result<tokio::sync::MutexGuard<'_, MemoryState>, TrackerError> {
        let mut guard = self.state.lock().await;
        guard.calls += 1;
        if let Some((remaining, transient)) = guard.failures {
            if remaining > 0 {
                guard.failures = Some((remaining - 1, transient));
                return Err(if transient {
                    TrackerError::Unreachable("injected failure".to_string())
                } else {
                    TrackerError::Rejected {
                        status: 422,
                        message: "injected failure".to_string(),
                    }
                });
            }
        }
        Ok(guard)
    }
}

fn issue_mut(state: &mut MemoryState, issue_id: u64) -> Result<&mut TrackedIssue, TrackerError> {
    state
        .issues
        .iter_mut()
        .find(|issue| issue.issue_id == issue_id)
        .ok_or(TrackerError::NotFound(issue_id))
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<TrackedIssue>, TrackerError> {
        let guard = self.begin_call().await?;
        Ok(guard
            .issues
            .iter()
            .find(|issue| issue.fingerprint.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn get_issue(&self, issue_id: u64) -> Result<Option<TrackedIssue>, TrackerError> {
        let guard = self.begin_call().await?;
        Ok(guard.issues.iter().find(|issue| issue.issue_id == issue_id).cloned())
    }

    async fn create_issue(&self, issue: NewIssue) -> Result<TrackedIssue, TrackerError> {
        let mut guard = self.begin_call().await?;
        let issue_id = guard.next_id;
        guard.next_id += 1;
        let created = TrackedIssue {
            fingerprint: Some(issue.fingerprint),
            issue_id,
            url: format!("{}/issues/{}", self.base_url, issue_id),
            title: issue.title,
            body: issue.body,
            state: IssueState::Open,
            assignee: issue.assignee,
        };
        debug!(issue = issue_id, "created in-memory issue");
        guard.issues.push(created.clone());
        Ok(created)
    }

    async fn close_issue(&self, issue_id: u64) -> Result<(), TrackerError> {
        let mut guard = self.begin_call().await?;
        issue_mut(&mut guard, issue_id)?.state = IssueState::Closed;
        Ok(())
    }

    async fn reopen_issue(&self, issue_id: u64) -> Result<(), TrackerError> {
        let mut guard = self.begin_call().await?;
        issue_mut(&mut guard, issue_id)?.state = IssueState::Open;
        Ok(())
    }

    async fn update_issue(&self, issue_id: u64, title: &str, body: &str) -> Result<(), TrackerError> {
        let mut guard = self.begin_call().await?;
        let issue = issue_mut(&mut guard, issue_id)?;
        issue.title = title.to_string();
        issue.body = body.to_string();
        Ok(())
    }

    async fn is_assignable(&self, login: &str) -> Result<bool, TrackerError> {
        let guard = self.begin_call().await?;
        Ok(guard
            .assignable
            .as_ref()
            .map_or(true, |allowed| allowed.contains(login)))
    }

    fn issue_id_for_ref(&self, issue_ref: &str) -> Option<u64> {
        issue_number_under(&self.base_url, issue_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_issue(fp: &str) -> NewIssue {
        NewIssue {
            fingerprint: fp.to_string(),
            title: "fix parser".to_string(),
            body: format!("<!-- todo-fingerprint: {fp} -->"),
            assignee: None,
            labels: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let tracker = InMemoryTracker::new("https://tracker/");
        let created = tracker.create_issue(new_issue("abc")).await.unwrap();
        assert_eq!(created.issue_id, 1);
        assert_eq!(created.url, "https://tracker/issues/1");
        let found = tracker.find_by_fingerprint("abc").await.unwrap().unwrap();
        assert_eq!(found.issue_id, 1);
        assert!(tracker.find_by_fingerprint("def").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_advances_ids() {
        let tracker = InMemoryTracker::new("https://tracker");
        let seeded = tracker
            .insert(42, "old", "<!-- todo-fingerprint: beef -->", IssueState::Open)
            .await;
        assert_eq!(seeded.fingerprint.as_deref(), Some("beef"));
        let created = tracker.create_issue(new_issue("abc")).await.unwrap();
        assert_eq!(created.issue_id, 43);
    }

    #[test]
    fn test_issue_refs_resolve_only_under_base_url() {
        let tracker = InMemoryTracker::new("https://github.com/acme/infra");
        assert_eq!(tracker.issue_id_for_ref("https://github.com/acme/infra/issues/3"), Some(3));
        assert_eq!(tracker.issue_id_for_ref("https://github.com/other/lib/issues/3"), None);
    }

    #[tokio::test]
    async fn test_close_missing_issue_is_not_found() {
        let tracker = InMemoryTracker::new("https://tracker");
        assert!(matches!(
            tracker.close_issue(9).await,
            Err(TrackerError::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let tracker = InMemoryTracker::new("https://tracker");
        tracker.fail_next(2, true).await;
        assert!(tracker.get_issue(1).await.unwrap_err().is_transient());
        assert!(tracker.get_issue(1).await.is_err());
        assert!(tracker.get_issue(1).await.is_ok());
        assert_eq!(tracker.calls().await, 3);

        tracker.fail_next(1, false).await;
        assert!(!tracker.get_issue(1).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_assignee_restriction() {
        let tracker = InMemoryTracker::new("https://tracker");
        assert!(tracker.is_assignable("anyone").await.unwrap());
        tracker.restrict_assignees(&["alice"]).await;
        assert!(tracker.is_assignable("alice").await.unwrap());
        assert!(!tracker.is_assignable("bob").await.unwrap());
    }
}
