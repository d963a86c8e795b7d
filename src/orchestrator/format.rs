//! Formatting functions for run output display.
//!
//! Pure functions that return strings, following the principle of
//! separating formatting from printing.

use colored::Colorize;
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use crate::diff::{extract_files_from_diff, line_count};
use crate::state::{Finding, RunState, Severity, TestResult};

use super::Step;

/// Characters of failing test output shown inline.
pub(crate) const FAILURE_EXCERPT_CHARS: usize = 500;

/// First `max_chars` characters of `text`, with an ellipsis if cut.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Formats a duration for display (e.g., "2m 5s" or "12.34s").
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Formats the startup banner for display.
pub(crate) fn format_banner(repo: &Path, max_attempts: u32, test_command: &str) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   🛫 Preflight Review & Fix".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(&mut out, "  Repository: {}", repo.display().to_string().cyan()).unwrap();
    writeln!(&mut out, "  Attempts:   {}", max_attempts.to_string().cyan()).unwrap();
    writeln!(&mut out, "  Tests:      {}", test_command.cyan()).unwrap();

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    out
}

/// Formats the attempt header line.
pub(crate) fn format_attempt_header(attempt: u32, max_attempts: u32) -> String {
    format!(
        "\n{} Attempt {}/{} {}",
        "━".repeat(18).dimmed(),
        attempt.to_string().cyan().bold(),
        max_attempts,
        "━".repeat(18).dimmed()
    )
}

/// Formats the line announcing a step.
pub(crate) fn format_step(step: Step) -> String {
    format!("\n{} {}", "▶".blue(), step.to_string().bold())
}

/// Formats the result of loading touched files.
pub(crate) fn format_initialized(diff: &str, files_touched: &[String], loaded: usize) -> String {
    let mut out = String::new();
    writeln!(&mut out, "  {} Read diff ({} lines)", "✓".green(), line_count(diff)).unwrap();
    writeln!(
        &mut out,
        "  {} Files touched: {}",
        "✓".green(),
        files_touched.join(", ")
    )
    .unwrap();
    write!(&mut out, "  {} Loaded {} file(s)", "✓".green(), loaded).unwrap();
    out
}

fn severity_label(severity: Severity) -> String {
    let label = format!("[{severity}]");
    match severity {
        Severity::High => label.red().bold().to_string(),
        Severity::Medium => label.yellow().to_string(),
        Severity::Low => label.dimmed().to_string(),
    }
}

/// Formats the findings summary.
pub(crate) fn format_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return format!("  {} No issues found", "✓".green());
    }

    let mut out = String::new();
    write!(&mut out, "  {} Found {} issue(s)", "•".yellow(), findings.len()).unwrap();
    for (i, finding) in findings.iter().enumerate() {
        write!(
            &mut out,
            "\n    {}. {} {}: {}",
            i + 1,
            severity_label(finding.severity),
            finding.file.cyan(),
            finding.issue
        )
        .unwrap();
    }
    out
}

/// Formats the size of a generated patch.
pub(crate) fn format_patch_summary(patch: &str) -> String {
    let files = extract_files_from_diff(patch).len();
    format!(
        "  {} Generated patch ({} lines, {} file(s))",
        "✓".green(),
        line_count(patch),
        files
    )
}

/// Formats a test outcome, with an excerpt of the output on failure.
pub(crate) fn format_test_outcome(result: &TestResult) -> String {
    if result.passed {
        format!("  {} Tests passed", "✓".green())
    } else {
        format!(
            "  {} Tests failed\n{}",
            "✗".red(),
            excerpt(result.output.trim(), FAILURE_EXCERPT_CHARS).dimmed()
        )
    }
}

/// Formats the retry notice.
pub(crate) fn format_retry(attempt: u32, max_attempts: u32) -> String {
    format!(
        "\n{} Retrying ({attempt}/{max_attempts} attempts used)",
        "⟳".yellow()
    )
}

/// Formats the final report.
pub(crate) fn format_final_report(state: &RunState, elapsed: Duration) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   📋 Final Report".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(
        &mut out,
        "  Repository:     {}",
        state.repo_path.display().to_string().cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Files reviewed: {}", state.files_touched.len()).unwrap();
    writeln!(&mut out, "  Issues found:   {}", state.findings.len()).unwrap();
    writeln!(
        &mut out,
        "  Attempts:       {}/{}",
        state.attempt, state.max_attempts
    )
    .unwrap();
    writeln!(&mut out, "  Duration:       {}", format_duration(elapsed)).unwrap();

    let status = if state.success {
        "SUCCESS".green().bold()
    } else {
        "FAILED".red().bold()
    };
    writeln!(&mut out, "  Status:         {status}").unwrap();

    if let Some(ref error) = state.error {
        writeln!(
            &mut out,
            "\n  {} {}",
            "Error:".red(),
            excerpt(error.trim(), FAILURE_EXCERPT_CHARS)
        )
        .unwrap();
    }

    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    out
}
