pub mod types;

pub use types::{Finding, RunInfo, RunReport, Severity, TodoCounts};

use crate::reconcile::{Action, FingerprintOutcome};
use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Build a RunReport from the run's outcomes and findings.
///
/// The overall severity is the max across findings; any failed
/// fingerprint makes it an error.
pub fn build(info: RunInfo, outcomes: Vec<FingerprintOutcome>, findings: Vec<Finding>) -> RunReport {
    let from_findings = findings.iter().map(|f| f.severity).max().unwrap_or(Severity::Info);
    let overall = if outcomes.iter().any(|o| o.action.is_failure()) {
        Severity::Error
    } else {
        from_findings
    };

    RunReport {
        info,
        outcomes,
        findings,
        overall,
    }
}

/// Output the report to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(mode = %report.info.mode, overall = %report.overall))]
pub fn output(report: &RunReport, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            write_markdown_report(report, path)
        }
    }
}

fn headline(info: &RunInfo) -> String {
    let dry = if info.dry_run { " (dry run)" } else { "" };
    match info.mode.as_str() {
        "commit" => format!("Commit {}{}", info.target, dry),
        _ => format!("Backfill {}..{}{}", info.base, info.target, dry),
    }
}

fn counts_line(info: &RunInfo) -> String {
    let c = info.counts;
    format!(
        "Files changed: {} | scanned: {} | TODOs: {} added, {} removed, {} modified, {} unchanged",
        info.files_changed, info.files_scanned, c.added, c.removed, c.modified, c.unchanged
    )
}

/// Issue number and link (or failure reason) for one outcome.
fn action_detail(action: &Action) -> String {
    match action {
        Action::Created { issue_id, url }
        | Action::Reused { issue_id, url }
        | Action::Reopened { issue_id, url }
        | Action::Updated { issue_id, url } => format!("#{issue_id} {url}"),
        Action::Closed { issue_id } | Action::AlreadyClosed { issue_id } => format!("#{issue_id}"),
        Action::NotTracked => String::new(),
        Action::Failed(err) => err.to_string(),
    }
}

fn location_suffix(finding: &Finding) -> String {
    match (&finding.file, finding.line) {
        (Some(f), Some(l)) => format!(" ({}:{})", f, l),
        (Some(f), None) => format!(" ({})", f),
        _ => String::new(),
    }
}

/// Format and print the report to the terminal with colors.
///
/// Commit 9f3c2e1
/// Files changed: 3 | scanned: 2 | TODOs: 1 added, 1 removed, 0 modified, 2 unchanged
///
/// ═══ Issues ═══
///   created   pin versions (ci/build.sh:3) #7 https://github.com/o/r/issues/7
///   closed    drop py2 (setup.cfg:12) #4
///
/// ═══ Result: OK ═══
fn print_terminal_report(report: &RunReport) {
    let info = &report.info;
    println!();
    println!("{}", headline(info).bold());
    println!("{}", counts_line(info));
    println!();

    println!("═══ Issues ═══");
    if report.outcomes.is_empty() {
        println!("  No issue changes.");
    }
    for outcome in &report.outcomes {
        println!(
            "  {} {} ({}) {}",
            colorize_action(&outcome.action),
            outcome.text,
            outcome.location,
            action_detail(&outcome.action)
        );
    }
    println!();

    if !report.findings.is_empty() {
        println!("═══ Warnings ═══");
        for finding in &report.findings {
            println!("  • {}{}", finding.message, location_suffix(finding));
        }
        println!();
    }

    if info.annotations_written > 0 || info.annotations_pending > 0 {
        println!("═══ Annotations ═══");
        if info.annotations_written > 0 {
            println!("  {} line(s) annotated", info.annotations_written);
        }
        if info.annotations_pending > 0 {
            println!("  {} line(s) to annotate (run with --write)", info.annotations_pending);
        }
        println!();
    }

    println!("═══ Result: {} ═══", colorize_severity(report.overall));
    println!();
}

/// Write the report as a markdown file.
fn write_markdown_report(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    let info = &report.info;
    let mut md = String::new();
    md.push_str(&format!("# {}\n\n", headline(info)));
    md.push_str(&format!("**{}**\n\n", counts_line(info)));

    md.push_str("## Issues\n\n");
    if report.outcomes.is_empty() {
        md.push_str("No issue changes.\n\n");
    } else {
        md.push_str("| Action | TODO | Location | Issue |\n|---|---|---|---|\n");
        for outcome in &report.outcomes {
            md.push_str(&format!(
                "| {} | {} | `{}` | {} |\n",
                outcome.action.label(),
                outcome.text.replace('|', "\\|"),
                outcome.location,
                action_detail(&outcome.action).replace('|', "\\|")
            ));
        }
        md.push('\n');
    }

    if !report.findings.is_empty() {
        md.push_str("## Warnings\n\n");
        for finding in &report.findings {
            let location = match (&finding.file, finding.line) {
                (Some(f), Some(l)) => format!(" (`{}:{}`)", f, l),
                (Some(f), None) => format!(" (`{}`)", f),
                _ => String::new(),
            };
            md.push_str(&format!("- **[{}]** {}{}\n", finding.severity, finding.message, location));
        }
        md.push('\n');
    }

    if info.annotations_written > 0 || info.annotations_pending > 0 {
        md.push_str(&format!(
            "**Annotations:** {} written, {} pending\n\n",
            info.annotations_written, info.annotations_pending
        ));
    }

    md.push_str(&format!("## Result: {}\n", report.overall));

    std::fs::write(path, md)?;
    Ok(())
}

fn colorize_action(action: &Action) -> colored::ColoredString {
    let label = format!("{:<14}", action.label());
    match action {
        Action::Failed(_) => label.red().bold(),
        Action::Created { .. } | Action::Reopened { .. } => label.green(),
        Action::Updated { .. } => label.yellow(),
        Action::Closed { .. } => label.blue(),
        _ => label.dimmed(),
    }
}

/// Helper to colorize a severity for terminal output.
fn colorize_severity(level: Severity) -> colored::ColoredString {
    match level {
        Severity::Error => "ERROR".red().bold(),
        Severity::Warning => "WARNING".yellow().bold(),
        Severity::Info => "OK".green().bold(),
    }
}
