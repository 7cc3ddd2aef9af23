use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{issue_number_under, parse_fingerprint, IssueState, IssueTracker, NewIssue, TrackedIssue, TrackerError};
use crate::config::GitHubConfig;

const USER_AGENT: &str = "todo-reconciler";

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    html_url: String,
    title: String,
    body: Option<String>,
    state: IssueState,
    assignee: Option<User>,
    /// Present when the "issue" is a pull request
    pull_request: Option<serde_json::Value>,
}

impl From<IssueResponse> for TrackedIssue {
    fn from(issue: IssueResponse) -> Self {
        let body = issue.body.unwrap_or_default();
        TrackedIssue {
            fingerprint: parse_fingerprint(&body).map(str::to_string),
            issue_id: issue.number,
            url: issue.html_url,
            title: issue.title,
            body,
            state: issue.state,
            assignee: issue.assignee.map(|u| u.login),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<IssueResponse>,
}

/// GitHub Issues over the REST API.
#[derive(Debug)]
pub struct GitHubTracker {
    client: Client,
    api_url: String,
    /// Web address issue links point at, e.g. `https://github.com/owner/repo`
    repo_url: String,
    owner: String,
    repo: String,
    token: String,
    labels: Vec<String>,
    /// Issues created by this process; the search index lags behind creation
    created: Mutex<HashMap<String, TrackedIssue>>,
}

impl GitHubTracker {
    pub fn new(api_url: &str, repo_slug: &str, token: &str, labels: Vec<String>) -> Result<Self, TrackerError> {
        let (owner, repo) = repo_slug
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| {
                TrackerError::Misconfigured(format!("repository '{repo_slug}', expected owner/name"))
            })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(TrackerError::from)?;
        let api_url = api_url.trim_end_matches('/');
        Ok(Self {
            client,
            repo_url: format!("{}/{}/{}", web_root(api_url), owner, repo),
            api_url: api_url.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
            labels,
            created: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &GitHubConfig) -> Result<Self, TrackerError> {
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| TrackerError::Misconfigured("GitHub token (GITHUB_TOKEN)".to_string()))?;
        let repo = config
            .repo
            .as_deref()
            .ok_or_else(|| TrackerError::Misconfigured("repository (GITHUB_REPOSITORY)".to_string()))?;
        Self::new(&config.api_url, repo, token, config.labels.clone())
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/{}/issues", self.api_url, self.owner, self.repo)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&self.token)
    }

    async fn patch_issue(&self, issue_id: u64, payload: serde_json::Value) -> Result<(), TrackerError> {
        let response = self
            .authorized(self.client.patch(format!("{}/{}", self.issues_url(), issue_id)))
            .json(&payload)
            .send()
            .await?;
        if is_missing(response.status()) {
            return Err(TrackerError::NotFound(issue_id));
        }
        check(response).await?;
        Ok(())
    }
}

/// Web host serving the issue pages for an API endpoint: `api.github.com`
/// for github.com, `/api/v3` stripped for GitHub Enterprise.
fn web_root(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://api.") {
        return format!("https://{rest}");
    }
    api_url.trim_end_matches("/api/v3").to_string()
}

/// Deleted and transferred issues answer 404 or 410.
fn is_missing(status: StatusCode) -> bool {
    matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE)
}

/// Turn a non-success response into a `TrackerError`.
async fn check(response: Response) -> Result<Response, TrackerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let message = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &headers, message))
}

fn error_for_status(status: StatusCode, headers: &HeaderMap, message: String) -> TrackerError {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let exhausted = header("x-ratelimit-remaining") == Some("0");
    let retry_after = header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (exhausted || retry_after.is_some()))
    {
        return TrackerError::RateLimited { retry_after };
    }
    if status.is_server_error() {
        return TrackerError::Server {
            status: status.as_u16(),
            message,
        };
    }
    TrackerError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    #[instrument(skip(self))]
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<TrackedIssue>, TrackerError> {
        let query = format!(
            "repo:{}/{} is:issue in:body \"todo-fingerprint: {}\"",
            self.owner, self.repo, fingerprint
        );
        let response = self
            .authorized(self.client.get(format!("{}/search/issues", self.api_url)))
            .query(&[("q", query.as_str()), ("per_page", "10")])
            .send()
            .await?;
        let search: SearchResponse = check(response).await?.json().await?;
        debug!(hits = search.items.len(), "searched issues by fingerprint");

        let found = search
            .items
            .into_iter()
            .filter(|item| item.pull_request.is_none())
            .map(TrackedIssue::from)
            .find(|issue| issue.fingerprint.as_deref() == Some(fingerprint));
        if found.is_some() {
            return Ok(found);
        }
        Ok(self.created.lock().await.get(fingerprint).cloned())
    }

    #[instrument(skip(self))]
    async fn get_issue(&self, issue_id: u64) -> Result<Option<TrackedIssue>, TrackerError> {
        let response = self
            .authorized(self.client.get(format!("{}/{}", self.issues_url(), issue_id)))
            .send()
            .await?;
        if is_missing(response.status()) {
            return Ok(None);
        }
        let issue: IssueResponse = check(response).await?.json().await?;
        if issue.pull_request.is_some() {
            return Ok(None);
        }
        Ok(Some(issue.into()))
    }

    #[instrument(skip(self, issue), fields(fingerprint = %issue.fingerprint))]
    async fn create_issue(&self, issue: NewIssue) -> Result<TrackedIssue, TrackerError> {
        let mut labels = self.labels.clone();
        for label in &issue.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        let payload = serde_json::json!({
            "title": issue.title,
            "body": issue.body,
            "labels": labels,
            "assignees": issue.assignee.iter().collect::<Vec<_>>(),
        });
        let response = self
            .authorized(self.client.post(self.issues_url()))
            .json(&payload)
            .send()
            .await?;
        let created: TrackedIssue = check(response).await?.json::<IssueResponse>().await?.into();
        debug!(issue = created.issue_id, url = %created.url, "created issue");
        self.created
            .lock()
            .await
            .insert(issue.fingerprint.clone(), created.clone());
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn close_issue(&self, issue_id: u64) -> Result<(), TrackerError> {
        self.patch_issue(
            issue_id,
            serde_json::json!({ "state": "closed", "state_reason": "completed" }),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn reopen_issue(&self, issue_id: u64) -> Result<(), TrackerError> {
        self.patch_issue(issue_id, serde_json::json!({ "state": "open" })).await
    }

    #[instrument(skip(self, body))]
    async fn update_issue(&self, issue_id: u64, title: &str, body: &str) -> Result<(), TrackerError> {
        self.patch_issue(issue_id, serde_json::json!({ "title": title, "body": body }))
            .await
    }

    #[instrument(skip(self))]
    async fn is_assignable(&self, login: &str) -> Result<bool, TrackerError> {
        let url = format!(
            "{}/repos/{}/{}/assignees/{}",
            self.api_url, self.owner, self.repo, login
        );
        let response = self.authorized(self.client.get(url)).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => check(response).await.map(|_| true),
        }
    }

    fn issue_id_for_ref(&self, issue_ref: &str) -> Option<u64> {
        issue_number_under(&self.repo_url, issue_ref)
    }
}
