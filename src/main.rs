mod annotate;
mod classify;
mod config;
mod engine;
mod reconcile;
mod report;
mod scan;
mod syntax;
mod tracker;
mod vcs;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use engine::{Engine, EngineOptions, Mode};
use tracker::github::GitHubTracker;
use tracker::memory::InMemoryTracker;
use tracker::IssueTracker;

/// TODO Reconciler: keeps GitHub issues in step with the TODO comments of a
/// git repository.
#[derive(Parser, Debug)]
#[command(name = "todo-reconciler", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Repository to reconcile
    #[arg(long, global = true, default_value = ".")]
    repo_path: PathBuf,

    /// Config file (default: .todo-reconciler.toml in the repository)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-memory issue tracker; nothing is sent to GitHub
    #[arg(long, global = true)]
    dry_run: bool,

    /// Rewrite TODO lines in the working tree with their issue links
    #[arg(long, global = true)]
    write: bool,

    /// Optional output file path for markdown report
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Assignee for TODOs without an author hint (default: the commit author)
    #[arg(long, global = true)]
    author: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a single commit against its parent
    Commit {
        /// Commit to reconcile
        sha: String,
    },
    /// Reconcile everything between two revisions
    Backfill {
        /// Starting revision (use the empty tree to adopt a whole repository)
        base: String,
        /// Revision to reconcile up to
        target: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = match cli.command {
        Command::Commit { sha } => Mode::Incremental { commit: sha },
        Command::Backfill { base, target } => Mode::Backfill { base, target },
    };

    info!("loading configuration");
    let config = config::Config::load(&cli.repo_path, cli.config.as_deref())?;
    let syntax = syntax::SyntaxTable::from_config(&cli.repo_path, &config.syntax)?;
    let scanner = scan::Scanner::new(&config.scanner)?;
    debug!(keywords = ?config.scanner.keywords, "scanner ready");

    let tracker: Box<dyn IssueTracker> = if cli.dry_run {
        let base_url = match &config.github.repo {
            Some(repo) => format!("https://github.com/{repo}"),
            None => "https://tracker.invalid/dry-run".to_string(),
        };
        info!(base_url = %base_url, "dry run, using in-memory issue tracker");
        Box::new(InMemoryTracker::new(&base_url))
    } else {
        Box::new(GitHubTracker::from_config(&config.github)?)
    };

    if cli.write && cli.dry_run {
        warn!("--write is ignored in a dry run");
    }
    let options = EngineOptions {
        repo_root: cli.repo_path.clone(),
        write: cli.write && !cli.dry_run,
        dry_run: cli.dry_run,
        concurrency: config.reconcile.concurrency,
        normalize_whitespace: config.scanner.normalize_whitespace,
        retry: config.reconcile.retry_policy(),
        author: cli.author,
        logins: config.github.logins.clone(),
    };

    let source = vcs::git::GitCli::new(&cli.repo_path);
    let engine = Engine::new(&source, tracker.as_ref(), scanner, syntax, options);

    info!(mode = mode.name(), "reconciling");
    let run_report = engine.run(&mode).await?;
    report::output(&run_report, cli.output.as_deref())?;
    info!(
        overall = %run_report.overall,
        outcomes = run_report.outcomes.len(),
        failures = run_report.outcomes.iter().filter(|o| o.action.is_failure()).count(),
        "done"
    );

    Ok(ExitCode::from(run_report.exit_code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commit_with_flags() {
        let cli = Cli::try_parse_from([
            "todo-reconciler",
            "commit",
            "9f3c2e1",
            "--dry-run",
            "--repo-path",
            "/src/infra",
            "-o",
            "report.md",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert!(!cli.write);
        assert_eq!(cli.repo_path, PathBuf::from("/src/infra"));
        assert_eq!(cli.output, Some(PathBuf::from("report.md")));
        assert!(matches!(cli.command, Command::Commit { sha } if sha == "9f3c2e1"));
    }

    #[test]
    fn test_parse_backfill() {
        let cli = Cli::try_parse_from(["todo-reconciler", "--write", "backfill", "v1.0", "HEAD"]).unwrap();
        assert!(cli.write);
        assert_eq!(cli.repo_path, PathBuf::from("."));
        assert!(matches!(
            cli.command,
            Command::Backfill { base, target } if base == "v1.0" && target == "HEAD"
        ));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["todo-reconciler"]).is_err());
        assert!(Cli::try_parse_from(["todo-reconciler", "backfill", "only-one"]).is_err());
    }
}
