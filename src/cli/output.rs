//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{ActionKind, DriftEntry, Impact, OutcomeStatus};
use crate::inspect::InspectionFailure;
use crate::report::{CycleReport, ReportStats};
use crate::state::{ArchivedReport, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Drift entry row for table display.
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Impact")]
    impact: String,
    #[tabled(rename = "Declared")]
    declared: String,
    #[tabled(rename = "Observed")]
    observed: String,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Archived report row for table display.
#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Report")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// Daily statistics row for table display.
#[derive(Tabled)]
struct DayRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Cycles")]
    cycles: usize,
    #[tabled(rename = "With drift")]
    drift_cycles: usize,
    #[tabled(rename = "Avg entries")]
    avg_entries: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a cycle report for display.
    #[must_use]
    pub fn format_report(&self, report: &CycleReport) -> String {
        match self.format {
            OutputFormat::Json => report.to_json().unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &CycleReport) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "\nDrift report: {}/{} ({})",
            report.project, report.environment, report.mode
        );
        if let Some(generation) = &report.generation {
            let _ = writeln!(output, "   Generation: {}", Self::truncate(generation, 12));
        }

        if let Some(reason) = report.failure() {
            let _ = writeln!(output, "\n{} Cycle failed: {reason}", "✗".red());
            return output;
        }

        if report.drift.is_empty() {
            let _ = writeln!(output, "\n{} No drift detected.", "✓".green());
        } else {
            let rows: Vec<DriftRow> = report.drift.iter().map(Self::drift_row).collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');

            let summary = &report.summary;
            let _ = writeln!(
                output,
                "\nDrift: {} missing, {} misconfigured, {} extra ({} high, {} medium, {} low)",
                summary.missing.to_string().red(),
                summary.misconfigured.to_string().yellow(),
                summary.extra,
                summary.high,
                summary.medium,
                summary.low
            );
        }

        Self::format_failures_text("Inspection errors", &report.inspection_errors, &mut output);

        Self::format_plan_text(report, &mut output);

        if let Some(residual) = &report.residual_drift {
            if residual.is_empty() {
                let _ = writeln!(output, "\n{} Infrastructure converged.", "✓".green());
            } else {
                let _ = writeln!(
                    output,
                    "\n{} {} drift entries remain after remediation.",
                    "⚠".yellow(),
                    residual.len()
                );
            }
        }
        Self::format_failures_text("Verification errors", &report.verification_errors, &mut output);

        output
    }

    fn format_failures_text(title: &str, failures: &[InspectionFailure], output: &mut String) {
        if failures.is_empty() {
            return;
        }
        let _ = writeln!(output, "\n{} {title}:", "⚠".yellow());
        for failure in failures {
            let _ = writeln!(
                output,
                "   - {}: {}",
                failure.resource_id.as_deref().unwrap_or("runtime"),
                failure.message
            );
        }
    }

    /// Appends the plan and execution outcomes.
    fn format_plan_text(report: &CycleReport, output: &mut String) {
        let Some(plan) = &report.plan else {
            return;
        };

        if !plan.manual_only.is_empty() {
            let _ = writeln!(
                output,
                "\nManual-only (not remediated): {}",
                plan.manual_only.join(", ")
            );
        }

        if plan.actions.is_empty() {
            return;
        }

        let rows: Vec<ActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, action)| {
                let outcome = report
                    .execution
                    .as_ref()
                    .and_then(|e| e.outcomes.iter().find(|o| o.resource_id == action.resource_id));
                ActionRow {
                    index: i + 1,
                    action: Self::format_action_kind(action.kind),
                    resource: action.resource_id.clone(),
                    status: outcome.map_or_else(
                        || "planned".dimmed().to_string(),
                        |o| Self::format_outcome(o.status),
                    ),
                    reason: Self::truncate(&action.reason, 40),
                }
            })
            .collect();

        let _ = writeln!(output, "\nRemediation plan:");
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if let Some(execution) = &report.execution {
            for failure in execution.failures() {
                let _ = writeln!(
                    output,
                    "   {} {}: {}",
                    "✗".red(),
                    failure.resource_id,
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid.\n", "✓".green())
                } else {
                    let mut text = format!(
                        "{} Configuration has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(text, "   - {error}");
                    }
                    text
                };

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                output
            }
        }
    }

    /// Formats the list of archived reports.
    #[must_use]
    pub fn format_reports(&self, reports: &[ArchivedReport]) -> String {
        match self.format {
            OutputFormat::Json => {
                let json: Vec<_> = reports
                    .iter()
                    .map(|r| serde_json::json!({ "name": r.name, "size": r.size }))
                    .collect();
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                if reports.is_empty() {
                    return String::from("No archived reports.\n");
                }
                let rows: Vec<ReportRow> = reports
                    .iter()
                    .map(|r| ReportRow {
                        name: r.name.clone(),
                        size: format!("{} B", r.size),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats drift statistics over archived reports.
    #[must_use]
    pub fn format_stats(&self, stats: &ReportStats) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(stats).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(
                    output,
                    "{} since {}",
                    "Drift statistics".bold(),
                    stats.since.format("%Y-%m-%d %H:%M:%S")
                );
                if stats.cycles == 0 {
                    output.push_str("No archived reports in this period.\n");
                    return output;
                }

                let _ = writeln!(
                    output,
                    "   Cycles: {} ({} with drift, {:.1}%), {} failed, {} degraded",
                    stats.cycles,
                    stats.drift_cycles,
                    stats.drift_rate * 100.0,
                    stats.failed_cycles,
                    stats.degraded_cycles
                );
                let _ = writeln!(
                    output,
                    "   Entries: {} total, {:.1} per cycle, {} at most",
                    stats.totals.total, stats.avg_entries, stats.max_entries
                );
                let _ = writeln!(
                    output,
                    "   Impact: {} high, {} medium, {} low",
                    stats.totals.high.to_string().red(),
                    stats.totals.medium.to_string().yellow(),
                    stats.totals.low
                );

                let rows: Vec<DayRow> = stats
                    .daily
                    .iter()
                    .map(|d| DayRow {
                        date: d.date.to_string(),
                        cycles: d.cycles,
                        drift_cycles: d.drift_cycles,
                        avg_entries: format!("{:.1}", d.avg_entries),
                    })
                    .collect();
                let _ = writeln!(output, "\n{}", Table::new(rows));
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "Lock {} held by {} since {} ({}s left)",
                lock.lock_id,
                lock.holder,
                lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a status message.
    #[must_use]
    pub fn message(&self, status: MessageKind, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status.as_str(), "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let symbol = match status {
                    MessageKind::Success => "✓".green(),
                    MessageKind::Warning => "⚠".yellow(),
                    MessageKind::Error => "✗".red(),
                };
                format!("{symbol} {message}")
            }
        }
    }

    fn drift_row(entry: &DriftEntry) -> DriftRow {
        DriftRow {
            resource: entry.resource_id.clone(),
            field: entry.field.clone(),
            kind: entry.kind.to_string(),
            impact: Self::format_impact(entry.impact),
            declared: Self::truncate(entry.declared.as_deref().unwrap_or("-"), 30),
            observed: Self::truncate(entry.observed.as_deref().unwrap_or("-"), 30),
        }
    }

    /// Formats an action kind with color.
    fn format_action_kind(kind: ActionKind) -> String {
        match kind {
            ActionKind::Recreate => "+recreate".green().to_string(),
            ActionKind::Reconfigure => "~reconfigure".yellow().to_string(),
            ActionKind::Ignore => "ignore".dimmed().to_string(),
        }
    }

    /// Formats an impact with color.
    fn format_impact(impact: Impact) -> String {
        match impact {
            Impact::High => "high".red().to_string(),
            Impact::Medium => "medium".yellow().to_string(),
            Impact::Low => "low".dimmed().to_string(),
        }
    }

    /// Formats an execution outcome with color.
    fn format_outcome(status: OutcomeStatus) -> String {
        match status {
            OutcomeStatus::Applied | OutcomeStatus::AlreadyApplied => {
                status.to_string().green().to_string()
            }
            OutcomeStatus::Failed => status.to_string().red().to_string(),
            OutcomeStatus::Cancelled => status.to_string().yellow().to_string(),
            OutcomeStatus::Skipped | OutcomeStatus::DryRun => {
                status.to_string().dimmed().to_string()
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

/// Kind of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Operation succeeded.
    Success,
    /// Something needs attention.
    Warning,
    /// Operation failed.
    Error,
}

impl MessageKind {
    /// Returns the JSON status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}
