//! Human readable rendering of execution results.
use colored::*;

use crate::{
    case::TestCaseConfig,
    executor::{registry::RunnerInfo, ExecutionResult, Status},
};

/// Generate a colorized line reporting the result of one case. With
/// `show_logs`, the logs of cases that did not pass follow the line.
pub fn report_str(case: &TestCaseConfig, result: &ExecutionResult, show_logs: bool) -> String {
    let mut buf = String::new();
    let label = format!("{}:{}", case.id, case.name);
    let timing = format!(" ({}ms)", result.duration).dimmed().to_string();

    match result.status {
        Status::Passed => {
            buf.push_str(&"✓ ".green().to_string());
            buf.push_str(&label.green().to_string());
        }
        Status::Failed => {
            buf.push_str(&"✗ ".red().to_string());
            buf.push_str(&label.red().to_string());
        }
        Status::Error => {
            buf.push_str(&"✗ ".red().to_string());
            buf.push_str(&label.red().to_string());
            buf.push_str(&" (error)".dimmed().to_string());
        }
        Status::Skipped => {
            buf.push_str(&"? ".yellow().to_string());
            buf.push_str(&label.yellow().to_string());
        }
    }
    buf.push_str(&timing);
    let (passed, failed) = result.tally();
    if passed + failed > 0 {
        buf.push_str(&format!(" [{}/{}]", passed, passed + failed).dimmed().to_string());
    }

    if let Some(message) = result.message.as_ref().or(result.error_message.as_ref()) {
        buf.push_str("\n    ");
        buf.push_str(&message.dimmed().to_string());
    }

    if show_logs && result.status != Status::Passed {
        for line in result.logs.iter().flatten() {
            buf.push_str("\n    ");
            buf.push_str(line);
        }
    }
    buf
}

/// One line per counted status, e.g. `3 passing / 1 failing / 0 errored`.
pub fn summary_str(results: &[&ExecutionResult]) -> String {
    let count = |status| results.iter().filter(|r| r.status == status).count();
    let mut buf = format!(
        "  {} / {} / {}",
        format!("{} passing", count(Status::Passed)).green(),
        format!("{} failing", count(Status::Failed)).red(),
        format!("{} errored", count(Status::Error)).red(),
    );
    let skipped = count(Status::Skipped);
    if skipped > 0 {
        buf.push_str(&format!(" / {}", format!("{} skipped", skipped).yellow()));
    }
    buf
}

/// Availability table of the registered runners.
pub fn runners_str(infos: &[RunnerInfo]) -> String {
    infos
        .iter()
        .map(|info| {
            let mark = if info.available {
                "✓".green()
            } else {
                "✗".red()
            };
            format!("{} {} ({})", mark, info.kind.bold(), info.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
