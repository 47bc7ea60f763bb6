//! Human-readable cycle summaries.

use dropzone_deploy::{CycleReport, RefreshOutcome};

use crate::theme::Theme;

/// Render `report` as terminal lines.
pub(crate) fn render(report: &CycleReport) -> Vec<String> {
    let mut lines = vec![Theme::header(&format!(
        "Cycle {} ({})",
        report.cycle_id, report.trigger
    ))];

    lines.push(Theme::dimmed(&format!(
        "{} artifacts scanned in {} ms",
        report.artifacts, report.elapsed_ms
    )));

    if report.is_noop() && report.failures.is_empty() {
        lines.push(Theme::success("Nothing to deploy"));
        return lines;
    }

    lines.push(Theme::success(&format!(
        "{} uninstalled, {} installed, {} updated, {} started",
        report.uninstalled.len(),
        report.installed.len(),
        report.updated.len(),
        report.started.len(),
    )));

    match &report.refresh {
        RefreshOutcome::NotNeeded | RefreshOutcome::Completed => {},
        RefreshOutcome::TimedOut => {
            lines.push(Theme::warning("Refresh did not complete in time"));
        },
        RefreshOutcome::Failed(message) => {
            lines.push(Theme::warning(&format!("Refresh failed: {message}")));
        },
    }

    for failure in &report.failures {
        lines.push(Theme::error(&failure.to_string()));
    }

    lines
}
