use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::annotate::{self, Annotation};
use crate::classify::{classify, Classification};
use crate::reconcile::{ReconcileError, Reconciler, RetryPolicy};
use crate::report::{self, Finding, RunInfo, RunReport, TodoCounts};
use crate::scan::{ScanError, Scanner, TodoMarker};
use crate::syntax::SyntaxTable;
use crate::tracker::IssueTracker;
use crate::vcs::{ChangedFile, RevisionSource, VcsError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Which revision pair a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// A single commit against its parent
    Incremental { commit: String },
    /// An arbitrary range, e.g. adopting the tool on an existing repository
    Backfill { base: String, target: String },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Incremental { .. } => "commit",
            Mode::Backfill { .. } => "backfill",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Working tree that annotations are written to
    pub repo_root: PathBuf,
    /// Rewrite source lines with their issue references
    pub write: bool,
    pub dry_run: bool,
    /// Files fetched and scanned at once
    pub concurrency: usize,
    pub normalize_whitespace: bool,
    pub retry: RetryPolicy,
    /// Assignee fallback instead of the commit author
    pub author: Option<String>,
    /// Commit author emails mapped to tracker logins
    pub logins: HashMap<String, String>,
}

/// Markers and findings of one changed file.
#[derive(Debug, Default)]
struct FileScan {
    path: String,
    scanned: bool,
    classification: Classification,
    findings: Vec<Finding>,
}

/// Runs the scan, classify, reconcile and annotate stages over a revision pair.
pub struct Engine<'a> {
    source: &'a dyn RevisionSource,
    tracker: &'a dyn IssueTracker,
    scanner: Scanner,
    syntax: SyntaxTable,
    options: EngineOptions,
}

impl<'a> Engine<'a> {
    pub fn new(
        source: &'a dyn RevisionSource,
        tracker: &'a dyn IssueTracker,
        scanner: Scanner,
        syntax: SyntaxTable,
        options: EngineOptions,
    ) -> Self {
        Self {
            source,
            tracker,
            scanner,
            syntax,
            options,
        }
    }

    pub async fn run(&self, mode: &Mode) -> Result<RunReport, EngineError> {
        let (base, target) = match mode {
            Mode::Incremental { commit } => (self.source.parent(commit).await?, commit.clone()),
            Mode::Backfill { base, target } => (base.clone(), target.clone()),
        };
        let span = info_span!("reconcile_run", mode = mode.name(), base = %base, target = %target);
        self.run_range(mode, base, target).instrument(span).await
    }

    async fn run_range(&self, mode: &Mode, base: String, target: String) -> Result<RunReport, EngineError> {
        // a backfill has no single triggering commit to blame
        let author = match (&self.options.author, mode) {
            (Some(author), _) => Some(author.clone()),
            (None, Mode::Incremental { commit }) => self
                .source
                .commit_author_email(commit)
                .await?
                .and_then(|email| author_login(&email, &self.options.logins)),
            (None, Mode::Backfill { .. }) => None,
        };

        let files = self.source.changed_files(&base, &target).await?;
        info!(files = files.len(), "collected changed files");

        let mut scans: Vec<FileScan> = stream::iter(files.iter())
            .map(|file| {
                let span = info_span!("scan_file", path = %file.path);
                self.scan_file(&base, &target, file).instrument(span)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect::<Vec<Result<FileScan, VcsError>>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;
        scans.sort_by(|a, b| a.path.cmp(&b.path));

        let mut classification = Classification::default();
        let mut findings = Vec::new();
        let mut files_scanned = 0;
        for scan in scans {
            files_scanned += usize::from(scan.scanned);
            classification.merge(scan.classification);
            findings.extend(scan.findings);
        }
        let counts = TodoCounts::from(&classification);
        info!(
            added = counts.added,
            removed = counts.removed,
            modified = counts.modified,
            unchanged = counts.unchanged,
            "classified TODOs"
        );

        if classification.is_empty() {
            info!("no TODOs in changed files");
        }

        let summary = Reconciler::new(self.tracker, self.options.retry, author)
            .reconcile(&classification)
            .await?;
        info!(
            outcomes = summary.outcomes.len(),
            failures = summary.failures(),
            tracker_calls = summary.tracker_calls,
            failed_calls = summary.failed_calls,
            "reconciled issues"
        );

        let (annotations_written, annotations_pending) =
            self.annotate(&classification, &summary.resolved(), &mut findings).await;

        let info = RunInfo {
            mode: mode.name().to_string(),
            base,
            target,
            dry_run: self.options.dry_run,
            files_changed: files.len(),
            files_scanned,
            counts,
            annotations_written,
            annotations_pending,
        };
        Ok(report::build(info, summary.outcomes, findings))
    }

    /// Fetch both sides of one file and classify its TODOs.
    async fn scan_file(&self, base: &str, target: &str, file: &ChangedFile) -> Result<FileScan, VcsError> {
        let mut result = FileScan {
            path: file.path.clone(),
            ..FileScan::default()
        };
        if file.is_binary {
            debug!("skipping binary file");
            return Ok(result);
        }

        let before = match file.before_path() {
            Some(path) => self.markers_at(base, path, false, &mut result).await?,
            None => Vec::new(),
        };
        let after = match file.after_path() {
            Some(path) => self.markers_at(target, path, true, &mut result).await?,
            None => Vec::new(),
        };

        result.classification = classify(&before, &after, self.options.normalize_whitespace);
        Ok(result)
    }

    /// Markers of `path` at `rev`. Scan warnings are only kept for the target
    /// side, where they can still be fixed.
    async fn markers_at(
        &self,
        rev: &str,
        path: &str,
        keep_warnings: bool,
        result: &mut FileScan,
    ) -> Result<Vec<TodoMarker>, VcsError> {
        if self.syntax.lookup(path).is_none() {
            debug!(path, "no comment syntax for file type");
            return Ok(Vec::new());
        }
        let Some(content) = self.source.file_content(rev, path).await? else {
            return Ok(Vec::new());
        };

        match self.scanner.scan(path, &content, &self.syntax) {
            Ok(outcome) => {
                result.scanned = true;
                if keep_warnings {
                    result.findings.extend(outcome.warnings.iter().map(scan_finding));
                }
                Ok(outcome.markers)
            }
            Err(err) => {
                debug!(path, error = %err, "file not scanned");
                Ok(Vec::new())
            }
        }
    }

    /// Embed resolved issue references into the target markers' lines.
    ///
    /// Returns (lines written, lines pending). Without `write` nothing is
    /// touched and every needed rewrite counts as pending.
    async fn annotate(
        &self,
        classification: &Classification,
        resolved: &HashMap<&str, &str>,
        findings: &mut Vec<Finding>,
    ) -> (usize, usize) {
        let mut by_file: BTreeMap<&str, Vec<Annotation>> = BTreeMap::new();
        for marker in classification.after_markers() {
            let Some(url) = resolved.get(marker.fingerprint.as_str()) else {
                continue;
            };
            if marker.issue_ref.as_deref() == Some(*url) {
                continue;
            }
            by_file.entry(marker.file_path.as_str()).or_default().push(Annotation {
                marker: marker.clone(),
                issue_ref: url.to_string(),
            });
        }

        if !self.options.write {
            let pending = by_file.values().map(Vec::len).sum();
            debug!(pending, "annotations not written");
            return (0, pending);
        }

        let mut written = 0;
        for (path, annotations) in &by_file {
            let closers = self
                .syntax
                .lookup(path)
                .map(|lang| lang.block_closers())
                .unwrap_or_default();
            match annotate::annotate_file(
                &self.options.repo_root,
                path,
                annotations,
                self.scanner.issue_ref_pattern(),
                &closers,
            )
            .await
            {
                Ok(result) => {
                    written += result.rewritten;
                    findings.extend(result.stale.iter().map(|stale| {
                        Finding::warning(stale.to_string(), Some(stale.file_path.as_str()), Some(stale.line_number))
                    }));
                }
                Err(err) => {
                    warn!(path, error = %err, "could not annotate file");
                    findings.push(Finding::error(err.to_string(), Some(*path), None));
                }
            }
        }
        info!(written, "annotated source lines");
        (written, 0)
    }
}

/// Tracker login of a commit author: the configured mapping for the email,
/// else the login inside a GitHub noreply address.
fn author_login(email: &str, logins: &HashMap<String, String>) -> Option<String> {
    if let Some(login) = logins
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(email))
        .map(|(_, login)| login.clone())
    {
        return Some(login);
    }
    let login = noreply_login(email).map(str::to_string);
    if login.is_none() {
        debug!(email, "no login known for commit author");
    }
    login
}

/// `login@users.noreply.github.com` or `12345+login@users.noreply.github.com`.
fn noreply_login(email: &str) -> Option<&str> {
    let (local, domain) = email.rsplit_once('@')?;
    if !domain.eq_ignore_ascii_case("users.noreply.github.com") {
        return None;
    }
    let login = local.split_once('+').map_or(local, |(_, login)| login);
    (!login.is_empty()).then_some(login)
}

fn scan_finding(warning: &ScanError) -> Finding {
    match warning {
        ScanError::MalformedMarker { path, line, reason } => {
            Finding::warning(format!("Malformed TODO: {reason}"), Some(path.as_str()), Some(*line))
        }
        other => Finding::warning(other.to_string(), None, None),
    }
}
