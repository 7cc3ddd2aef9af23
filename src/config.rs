use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::reconcile::RetryPolicy;

/// Name of the per-repository config file.
pub const CONFIG_FILE: &str = ".todo-reconciler.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from .todo-reconciler.toml.
/// All fields are optional; the tool works with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub syntax: SyntaxConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// "owner/name". If None, falls back to GITHUB_REPOSITORY env var.
    pub repo: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Labels put on every created issue
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    /// Commit author email to GitHub login, for assigning issues
    #[serde(default)]
    pub logins: HashMap<String, String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            repo: None,
            api_url: default_api_url(),
            labels: default_labels(),
            logins: HashMap::new(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_labels() -> Vec<String> {
    vec!["todo".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Marker keywords, matched at a word boundary
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    /// Treat whitespace-only edits of a TODO as unchanged
    #[serde(default = "default_true")]
    pub normalize_whitespace: bool,
    /// Case-fold text before fingerprinting
    #[serde(default)]
    pub case_insensitive_fingerprint: bool,
    /// Attach following comment lines to the marker as its body
    #[serde(default = "default_true")]
    pub collect_body: bool,
    /// Regex recognizing an issue reference at the end of a TODO
    #[serde(default = "default_issue_ref_pattern")]
    pub issue_ref_pattern: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            case_sensitive: true,
            normalize_whitespace: true,
            case_insensitive_fingerprint: false,
            collect_body: true,
            issue_ref_pattern: default_issue_ref_pattern(),
        }
    }
}

fn default_keywords() -> Vec<String> {
    vec!["TODO".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_issue_ref_pattern() -> String {
    r"https?://\S+/issues/\d+".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyntaxConfig {
    /// JSON syntax table, relative to the repository root
    pub table: Option<PathBuf>,
    /// Use only the table file, without the built-in entries
    #[serde(default)]
    pub replace_defaults: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Files fetched and scanned at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

impl ReconcileConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

impl Config {
    /// Load configuration for the repository at `repo_root`.
    ///
    /// An explicit path must exist. Otherwise .todo-reconciler.toml in the
    /// repository root is used when present, else the defaults.
    /// Token and repo fall back to GITHUB_TOKEN / GITHUB_REPOSITORY.
    pub fn load(repo_root: &Path, explicit: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = repo_root.join(CONFIG_FILE);
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    Config::default()
                }
            }
        };

        if config.github.token.is_none() {
            config.github.token = std::env::var("GITHUB_TOKEN").ok();
        }
        if config.github.repo.is_none() {
            config.github.repo = std::env::var("GITHUB_REPOSITORY").ok();
        }

        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}
