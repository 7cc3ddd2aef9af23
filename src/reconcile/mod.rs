pub mod retry;

pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::classify::{Classification, MarkerPair};
use crate::scan::fingerprint::normalize_text;
use crate::scan::TodoMarker;
use crate::tracker::{render_body, IssueState, IssueTracker, NewIssue, TrackedIssue, TrackerError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to create issue for {location}: {source}")]
    IssueCreation {
        location: String,
        #[source]
        source: TrackerError,
    },

    #[error("Failed to close issue for {location}: {source}")]
    IssueClose {
        location: String,
        #[source]
        source: TrackerError,
    },

    #[error("Failed to update issue for {location}: {source}")]
    IssueUpdate {
        location: String,
        #[source]
        source: TrackerError,
    },

    #[error("Issue tracker unavailable: all {failed} tracker calls failed")]
    TrackerUnavailable { failed: usize },
}

/// What reconciliation did for one fingerprint.
#[derive(Debug)]
pub enum Action {
    Created { issue_id: u64, url: String },
    /// An open issue with this fingerprint already existed
    Reused { issue_id: u64, url: String },
    Reopened { issue_id: u64, url: String },
    Updated { issue_id: u64, url: String },
    Closed { issue_id: u64 },
    AlreadyClosed { issue_id: u64 },
    /// Removed TODO with no issue behind it
    NotTracked,
    Failed(ReconcileError),
}

impl Action {
    /// Issue URL the TODO should now point at.
    pub fn issue_url(&self) -> Option<&str> {
        match self {
            Action::Created { url, .. }
            | Action::Reused { url, .. }
            | Action::Reopened { url, .. }
            | Action::Updated { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Action::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Created { .. } => "created",
            Action::Reused { .. } => "reused",
            Action::Reopened { .. } => "reopened",
            Action::Updated { .. } => "updated",
            Action::Closed { .. } => "closed",
            Action::AlreadyClosed { .. } => "already closed",
            Action::NotTracked => "not tracked",
            Action::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct FingerprintOutcome {
    pub fingerprint: String,
    pub location: String,
    pub text: String,
    pub action: Action,
}

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub outcomes: Vec<FingerprintOutcome>,
    pub tracker_calls: usize,
    pub failed_calls: usize,
}

impl ReconcileSummary {
    /// Fingerprint to issue URL for every TODO that ended up linked.
    pub fn resolved(&self) -> HashMap<&str, &str> {
        self.outcomes
            .iter()
            .filter_map(|o| o.action.issue_url().map(|url| (o.fingerprint.as_str(), url)))
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.action.is_failure()).count()
    }
}

/// Brings tracker state in line with one run's classification.
///
/// Fingerprints are handled one at a time; every creation is preceded by a
/// lookup so a repeated run reuses issues instead of duplicating them.
pub struct Reconciler<'a> {
    tracker: &'a dyn IssueTracker,
    retry: RetryPolicy,
    commit_author: Option<String>,
    calls: usize,
    failed_calls: usize,
    transient_failures: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(tracker: &'a dyn IssueTracker, retry: RetryPolicy, commit_author: Option<String>) -> Self {
        Self {
            tracker,
            retry,
            commit_author,
            calls: 0,
            failed_calls: 0,
            transient_failures: 0,
        }
    }

    /// Reconcile every added, modified and removed TODO.
    ///
    /// Per-fingerprint failures are recorded in the summary. Only a run in
    /// which every tracker call failed with a transient error is an `Err`.
    pub async fn reconcile(mut self, classification: &Classification) -> Result<ReconcileSummary, ReconcileError> {
        let mut summary = ReconcileSummary::default();

        for (fp, marker) in &classification.added {
            let span = info_span!("reconcile_added", fingerprint = %fp, location = %marker.location());
            let action = self.reconcile_added(marker).instrument(span).await;
            summary.outcomes.push(outcome(marker, action));
        }

        for (fp, pair) in &classification.modified {
            let span = info_span!("reconcile_modified", fingerprint = %fp, location = %pair.after.location());
            let action = self.reconcile_modified(pair).instrument(span).await;
            summary.outcomes.push(outcome(&pair.after, action));
        }

        for (fp, marker) in &classification.removed {
            let span = info_span!("reconcile_removed", fingerprint = %fp, location = %marker.location());
            let action = self.reconcile_removed(marker).instrument(span).await;
            summary.outcomes.push(outcome(marker, action));
        }

        summary.tracker_calls = self.calls;
        summary.failed_calls = self.failed_calls;
        debug!(
            calls = self.calls,
            failed = self.failed_calls,
            outcomes = summary.outcomes.len(),
            "reconciliation finished"
        );

        if self.calls > 0 && self.transient_failures == self.calls {
            return Err(ReconcileError::TrackerUnavailable {
                failed: self.failed_calls,
            });
        }
        Ok(summary)
    }

    /// One tracker operation under the retry policy, counted for the
    /// unavailability check.
    async fn call<T, F, Fut>(&mut self, what: &str, op: F) -> Result<T, TrackerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TrackerError>>,
    {
        self.calls += 1;
        let result = self.retry.run(what, op).await;
        if let Err(err) = &result {
            self.failed_calls += 1;
            if err.is_transient() {
                self.transient_failures += 1;
            }
        }
        result
    }

    async fn find(&mut self, marker: &TodoMarker) -> Result<Option<TrackedIssue>, TrackerError> {
        let tracker = self.tracker;
        let fp = marker.fingerprint.as_str();
        self.call("find issue", || tracker.find_by_fingerprint(fp)).await
    }

    /// Find the issue behind a TODO: the one its link points at, else the
    /// one carrying its fingerprint.
    ///
    /// `seen_as` are the TODO's markers across both revisions. Links into
    /// other trackers are not followed, and a linked issue filed for some
    /// other TODO is passed over.
    async fn find_linked(
        &mut self,
        marker: &TodoMarker,
        seen_as: &[&TodoMarker],
    ) -> Result<Option<TrackedIssue>, TrackerError> {
        let tracker = self.tracker;
        let mut tried = Vec::new();
        for issue_ref in seen_as.iter().filter_map(|m| m.issue_ref.as_deref()) {
            let Some(issue_id) = tracker.issue_id_for_ref(issue_ref) else {
                debug!(issue_ref, "not following link to another tracker");
                continue;
            };
            if tried.contains(&issue_id) {
                continue;
            }
            tried.push(issue_id);
            let Some(issue) = self.call("get issue", || tracker.get_issue(issue_id)).await? else {
                continue;
            };
            if filed_for(&issue, &marker.fingerprint, seen_as) {
                debug!(issue = issue_id, "matched issue by embedded reference");
                return Ok(Some(issue));
            }
            debug!(issue = issue_id, "linked issue tracks a different TODO");
        }
        self.find(marker).await
    }

    async fn reconcile_added(&mut self, marker: &TodoMarker) -> Action {
        let fail = |source| {
            Action::Failed(ReconcileError::IssueCreation {
                location: marker.location(),
                source,
            })
        };

        let existing = match self.find(marker).await {
            Ok(existing) => existing,
            Err(source) => return fail(source),
        };

        match existing {
            Some(issue) if issue.state == IssueState::Open => {
                info!(issue = issue.issue_id, "reusing open issue");
                Action::Reused {
                    issue_id: issue.issue_id,
                    url: issue.url,
                }
            }
            Some(issue) => {
                let tracker = self.tracker;
                let issue_id = issue.issue_id;
                match self.call("reopen issue", || tracker.reopen_issue(issue_id)).await {
                    Ok(()) => {
                        info!(issue = issue_id, "reopened issue");
                        Action::Reopened { issue_id, url: issue.url }
                    }
                    Err(source) => fail(source),
                }
            }
            None => self.create(marker).await.unwrap_or_else(fail),
        }
    }

    async fn create(&mut self, marker: &TodoMarker) -> Result<Action, TrackerError> {
        let assignee = self.resolve_assignee(marker).await;
        let request = NewIssue {
            fingerprint: marker.fingerprint.clone(),
            title: marker.text.clone(),
            body: render_body(marker),
            assignee,
            labels: vec![marker.keyword.to_lowercase()],
        };
        let tracker = self.tracker;
        let created = self
            .call("create issue", || tracker.create_issue(request.clone()))
            .await?;
        info!(issue = created.issue_id, url = %created.url, "created issue");
        Ok(Action::Created {
            issue_id: created.issue_id,
            url: created.url,
        })
    }

    /// Author hint, else commit author; unassigned when the tracker does not
    /// know the login or cannot be asked.
    async fn resolve_assignee(&mut self, marker: &TodoMarker) -> Option<String> {
        let login = marker.author_hint.clone().or_else(|| self.commit_author.clone())?;
        let tracker = self.tracker;
        match self.call("check assignee", || tracker.is_assignable(&login)).await {
            Ok(true) => Some(login),
            Ok(false) => {
                info!(login = %login, "author is not assignable, leaving issue unassigned");
                None
            }
            Err(err) => {
                warn!(login = %login, error = %err, "could not check assignee, leaving issue unassigned");
                None
            }
        }
    }

    async fn reconcile_modified(&mut self, pair: &MarkerPair) -> Action {
        let existing = match self.find_linked(&pair.after, &[&pair.after, &pair.before]).await {
            Ok(existing) => existing,
            Err(source) => {
                return Action::Failed(ReconcileError::IssueUpdate {
                    location: pair.after.location(),
                    source,
                })
            }
        };

        let Some(issue) = existing else {
            debug!("modified TODO has no issue yet, creating one");
            return self.create(&pair.after).await.unwrap_or_else(|source| {
                Action::Failed(ReconcileError::IssueCreation {
                    location: pair.after.location(),
                    source,
                })
            });
        };

        let tracker = self.tracker;
        let body = render_body(&pair.after);
        let title = pair.after.text.as_str();
        match self
            .call("update issue", || tracker.update_issue(issue.issue_id, title, &body))
            .await
        {
            Ok(()) => {
                info!(issue = issue.issue_id, "updated issue description");
                Action::Updated {
                    issue_id: issue.issue_id,
                    url: issue.url,
                }
            }
            Err(source) => Action::Failed(ReconcileError::IssueUpdate {
                location: pair.after.location(),
                source,
            }),
        }
    }

    async fn reconcile_removed(&mut self, marker: &TodoMarker) -> Action {
        let fail = |source| {
            Action::Failed(ReconcileError::IssueClose {
                location: marker.location(),
                source,
            })
        };

        let existing = match self.find_linked(marker, &[marker]).await {
            Ok(existing) => existing,
            Err(source) => return fail(source),
        };

        match existing {
            None => {
                debug!("removed TODO had no issue");
                Action::NotTracked
            }
            Some(issue) if issue.state == IssueState::Closed => Action::AlreadyClosed {
                issue_id: issue.issue_id,
            },
            Some(issue) => {
                let tracker = self.tracker;
                let issue_id = issue.issue_id;
                match self.call("close issue", || tracker.close_issue(issue_id)).await {
                    Ok(()) => {
                        info!(issue = issue_id, "closed issue");
                        Action::Closed { issue_id }
                    }
                    Err(TrackerError::NotFound(_)) => Action::NotTracked,
                    Err(source) => fail(source),
                }
            }
        }
    }
}

/// Whether `issue` tracks this TODO: filed by hand (no fingerprint), carrying
/// its fingerprint, or titled after one of its texts.
fn filed_for(issue: &TrackedIssue, fingerprint: &str, seen_as: &[&TodoMarker]) -> bool {
    match issue.fingerprint.as_deref() {
        None => true,
        Some(fp) if fp == fingerprint => true,
        Some(_) => {
            let title = normalize_text(&issue.title, true);
            seen_as.iter().any(|m| normalize_text(&m.text, true) == title)
        }
    }
}

fn outcome(marker: &TodoMarker, action: Action) -> FingerprintOutcome {
    FingerprintOutcome {
        fingerprint: marker.fingerprint.clone(),
        location: marker.location(),
        text: marker.text.clone(),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::config::ScannerConfig;
    use crate::scan::Scanner;
    use crate::syntax::SyntaxTable;
    use crate::tracker::memory::InMemoryTracker;

    fn scan(path: &str, content: &str) -> Vec<TodoMarker> {
        Scanner::new(&ScannerConfig::default())
            .unwrap()
            .scan(path, content, &SyntaxTable::builtin())
            .unwrap()
            .markers
    }

    fn diff(before: &str, after: &str) -> Classification {
        classify(&scan("ci/build.sh", before), &scan("ci/build.sh", after), true)
    }

    async fn run(tracker: &InMemoryTracker, classification: &Classification) -> ReconcileSummary {
        Reconciler::new(tracker, RetryPolicy::immediate(3), Some("committer".to_string()))
            .reconcile(classification)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_added_todo_creates_open_issue() {
        let tracker = InMemoryTracker::new("https://tracker");
        let summary = run(&tracker, &diff("", "# TODO(alice): pin versions\n")).await;

        assert_eq!(summary.outcomes.len(), 1);
        assert!(matches!(summary.outcomes[0].action, Action::Created { issue_id: 1, .. }));
        let issues = tracker.issues().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].state, IssueState::Open);
        assert_eq!(issues[0].title, "pin versions");
        assert_eq!(issues[0].assignee.as_deref(), Some("alice"));
        assert_eq!(
            summary.resolved().values().next().copied(),
            Some("https://tracker/issues/1")
        );
    }

    #[tokio::test]
    async fn test_assignee_falls_back_to_commit_author() {
        let tracker = InMemoryTracker::new("https://tracker");
        run(&tracker, &diff("", "# TODO: pin versions\n")).await;
        assert_eq!(tracker.issues().await[0].assignee.as_deref(), Some("committer"));
    }

    #[tokio::test]
    async fn test_unknown_assignee_leaves_issue_unassigned() {
        let tracker = InMemoryTracker::new("https://tracker");
        tracker.restrict_assignees(&["someone-else"]).await;
        let summary = run(&tracker, &diff("", "# TODO(alice): pin versions\n")).await;
        assert!(matches!(summary.outcomes[0].action, Action::Created { .. }));
        assert!(tracker.issues().await[0].assignee.is_none());
    }

    #[tokio::test]
    async fn test_repeated_run_does_not_duplicate() {
        let tracker = InMemoryTracker::new("https://tracker");
        let classification = diff("", "# TODO: pin versions\n");
        run(&tracker, &classification).await;
        let second = run(&tracker, &classification).await;

        assert!(matches!(second.outcomes[0].action, Action::Reused { issue_id: 1, .. }));
        assert_eq!(tracker.issues().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reappearing_todo_reopens_closed_issue() {
        let tracker = InMemoryTracker::new("https://tracker");
        run(&tracker, &diff("", "# TODO: pin versions\n")).await;
        run(&tracker, &diff("# TODO: pin versions\n", "")).await;
        assert_eq!(tracker.issues().await[0].state, IssueState::Closed);

        let summary = run(&tracker, &diff("", "# TODO: pin versions\n")).await;
        assert!(matches!(summary.outcomes[0].action, Action::Reopened { issue_id: 1, .. }));
        let issues = tracker.issues().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].state, IssueState::Open);
    }

    #[tokio::test]
    async fn test_removed_todo_closes_issue_idempotently() {
        let tracker = InMemoryTracker::new("https://tracker");
        run(&tracker, &diff("", "# TODO: pin versions\n")).await;

        let removal = diff("# TODO: pin versions\n", "");
        let first = run(&tracker, &removal).await;
        assert!(matches!(first.outcomes[0].action, Action::Closed { issue_id: 1 }));

        let second = run(&tracker, &removal).await;
        assert!(matches!(second.outcomes[0].action, Action::AlreadyClosed { issue_id: 1 }));
        assert_eq!(tracker.issues().await[0].state, IssueState::Closed);
    }

    #[tokio::test]
    async fn test_removed_annotated_todo_closes_referenced_issue() {
        let tracker = InMemoryTracker::new("https://tracker");
        tracker.insert(42, "fix parser", "filed by hand", IssueState::Open).await;

        let summary = run(
            &tracker,
            &diff("# TODO: fix parser https://tracker/issues/42\n", "echo done\n"),
        )
        .await;

        assert!(matches!(summary.outcomes[0].action, Action::Closed { issue_id: 42 }));
        assert_eq!(tracker.issues().await[0].state, IssueState::Closed);
    }

    #[tokio::test]
    async fn test_link_to_another_repository_is_not_followed() {
        let tracker = InMemoryTracker::new("https://github.com/acme/infra");
        tracker.insert(5, "upstream bug", "filed by hand", IssueState::Open).await;

        let removed = run(
            &tracker,
            &diff("# TODO: wait for upstream https://github.com/other/lib/issues/5\n", "echo done\n"),
        )
        .await;
        assert!(matches!(removed.outcomes[0].action, Action::NotTracked));

        let modified = run(
            &tracker,
            &diff(
                "# TODO: wait for upstream https://github.com/other/lib/issues/5\n",
                "# TODO: wait for upstream release https://github.com/other/lib/issues/5\n",
            ),
        )
        .await;
        assert!(matches!(modified.outcomes[0].action, Action::Created { issue_id: 6, .. }));

        let issues = tracker.issues().await;
        assert_eq!(issues[0].issue_id, 5);
        assert_eq!(issues[0].state, IssueState::Open);
        assert_eq!(issues[0].title, "upstream bug");
    }

    #[tokio::test]
    async fn test_link_to_issue_of_another_todo_is_not_closed() {
        let tracker = InMemoryTracker::new("https://tracker");
        tracker
            .insert(7, "rotate keys", "<!-- todo-fingerprint: 00ff -->", IssueState::Open)
            .await;

        let summary = run(&tracker, &diff("# TODO: fix parser https://tracker/issues/7\n", "")).await;

        assert!(matches!(summary.outcomes[0].action, Action::NotTracked));
        assert_eq!(tracker.issues().await[0].state, IssueState::Open);
    }

    #[tokio::test]
    async fn test_deleting_one_of_two_identical_todos_closes_its_own_issue() {
        let tracker = InMemoryTracker::new("https://tracker");
        run(&tracker, &diff("", "# TODO: retry\n# TODO: retry\n")).await;

        let both = "# TODO: retry https://tracker/issues/1\n# TODO: retry https://tracker/issues/2\n";
        let survivor = "# TODO: retry https://tracker/issues/2\n";
        let summary = run(&tracker, &diff(both, survivor)).await;

        assert_eq!(summary.outcomes.len(), 1);
        assert!(matches!(summary.outcomes[0].action, Action::Closed { issue_id: 1 }));
        let issues = tracker.issues().await;
        assert_eq!(issues[0].state, IssueState::Closed);
        assert_eq!(issues[1].state, IssueState::Open);

        let summary = run(&tracker, &diff(survivor, "")).await;
        assert!(matches!(summary.outcomes[0].action, Action::Closed { issue_id: 2 }));
        assert_eq!(tracker.issues().await[1].state, IssueState::Closed);
    }

    #[tokio::test]
    async fn test_removed_untracked_todo_is_noop() {
        let tracker = InMemoryTracker::new("https://tracker");
        let summary = run(&tracker, &diff("# TODO: never filed\n", "")).await;
        assert!(matches!(summary.outcomes[0].action, Action::NotTracked));
        assert_eq!(summary.failures(), 0);
    }

    #[tokio::test]
    async fn test_modified_todo_updates_same_issue() {
        let tracker = InMemoryTracker::new("https://tracker");
        run(&tracker, &diff("", "# TODO: pin versions\n")).await;

        let summary = run(
            &tracker,
            &diff("# TODO: pin versions\n", "# TODO: pin versions\n# use a lockfile\n"),
        )
        .await;

        assert!(matches!(summary.outcomes[0].action, Action::Updated { issue_id: 1, .. }));
        let issues = tracker.issues().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].state, IssueState::Open);
        assert!(issues[0].body.starts_with("use a lockfile"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let tracker = InMemoryTracker::new("https://tracker");
        tracker.fail_next(2, true).await;
        let summary = run(&tracker, &diff("", "# TODO: pin versions\n")).await;
        assert!(matches!(summary.outcomes[0].action, Action::Created { .. }));
        assert_eq!(summary.failed_calls, 0);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_fingerprint() {
        let tracker = InMemoryTracker::new("https://tracker");
        tracker.fail_next(1, false).await;
        let summary = run(&tracker, &diff("", "# TODO: first\n# TODO: second\n")).await;

        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.failures(), 1);
        let failed = summary.outcomes.iter().find(|o| o.action.is_failure()).unwrap();
        assert!(matches!(
            failed.action,
            Action::Failed(ReconcileError::IssueCreation { .. })
        ));
        assert_eq!(tracker.issues().await.len(), 1);
    }

    #[tokio::test]
    async fn test_total_unavailability_is_fatal() {
        let tracker = InMemoryTracker::new("https://tracker");
        tracker.fail_next(usize::MAX, true).await;
        let result = Reconciler::new(&tracker, RetryPolicy::immediate(2), None)
            .reconcile(&diff("", "# TODO: first\n# TODO: second\n"))
            .await;
        assert!(matches!(
            result,
            Err(ReconcileError::TrackerUnavailable { failed: 2 })
        ));
    }

    #[tokio::test]
    async fn test_unchanged_todos_make_no_calls() {
        let tracker = InMemoryTracker::new("https://tracker");
        let summary = run(&tracker, &diff("# TODO: same\n", "# TODO: same\n")).await;
        assert!(summary.outcomes.is_empty());
        assert_eq!(tracker.calls().await, 0);
    }
}
