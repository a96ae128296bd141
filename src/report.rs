//! Cycle reports.
//!
//! A [`CycleReport`] is the machine-readable record of one detection or
//! remediation cycle: the drift found, the plan, the execution outcomes and
//! any non-fatal errors. It is printed, written to a file and archived.
//! [`ReportStats`] and [`ReportExport`] work over the archive.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::declared::ResourceType;
use crate::error::Result;
use crate::inspect::InspectionFailure;
use crate::planner::{DriftEntry, DriftKind, ExecutionReport, Impact, RemediationPlan};
use crate::state::{WorkspaceStore, REPORT_PREFIX, REPORT_TIME_FORMAT};

/// Exit code when no drift was found.
pub const EXIT_CLEAN: u8 = 0;

/// Exit code when drift was found.
pub const EXIT_DRIFT: u8 = 1;

/// Exit code on error or degraded inspection.
pub const EXIT_ERROR: u8 = 2;

/// What a cycle is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    /// Detect and report only.
    Detect,
    /// Plan without applying.
    DryRun,
    /// Plan, apply and verify.
    Remediate,
}

/// Stage of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "reason")]
pub enum CycleStage {
    /// No cycle running, or the last cycle completed.
    Idle,
    /// Querying live infrastructure.
    Inspecting,
    /// Comparing declared and observed state.
    Diffing,
    /// Building the remediation plan.
    Planning,
    /// Applying remediation actions.
    Executing,
    /// Re-inspecting remediated resources.
    Verifying,
    /// The cycle aborted.
    Failed(String),
}

/// Drift counts per kind and impact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftSummary {
    /// Total drift entries.
    pub total: usize,
    /// Missing resources.
    pub missing: usize,
    /// Misconfigured fields.
    pub misconfigured: usize,
    /// Undeclared resources.
    pub extra: usize,
    /// High impact entries.
    pub high: usize,
    /// Medium impact entries.
    pub medium: usize,
    /// Low impact entries.
    pub low: usize,
}

/// Record of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Unique cycle identifier.
    pub cycle_id: String,
    /// When the cycle started.
    pub timestamp: DateTime<Utc>,
    /// When the cycle ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Cycle mode.
    pub mode: CycleMode,
    /// Declared generation, once loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    /// Declared state origin, once loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Final stage.
    pub stage: CycleStage,
    /// Whether any drift was found.
    pub drift_detected: bool,
    /// Drift counts.
    pub summary: DriftSummary,
    /// Drift entries, sorted by resource id then field.
    pub drift: Vec<DriftEntry>,
    /// Non-fatal inspection errors.
    pub inspection_errors: Vec<InspectionFailure>,
    /// Remediation plan, if planning ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<RemediationPlan>,
    /// Execution outcomes, if execution ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
    /// Drift left after remediation, if anything was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub residual_drift: Option<Vec<DriftEntry>>,
    /// Resources the verification pass could not observe.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_errors: Vec<InspectionFailure>,
    /// Declared resource counts by type.
    pub expected: BTreeMap<ResourceType, usize>,
    /// Observed resource counts by type.
    pub observed: BTreeMap<ResourceType, usize>,
}

impl DriftSummary {
    /// Counts entries by kind and impact.
    #[must_use]
    pub fn from_entries(entries: &[DriftEntry]) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };

        for entry in entries {
            match entry.kind {
                DriftKind::Missing => summary.missing += 1,
                DriftKind::Misconfigured => summary.misconfigured += 1,
                DriftKind::Extra => summary.extra += 1,
            }
            match entry.impact {
                Impact::High => summary.high += 1,
                Impact::Medium => summary.medium += 1,
                Impact::Low => summary.low += 1,
            }
        }

        summary
    }

    fn add(&mut self, other: &Self) {
        self.total += other.total;
        self.missing += other.missing;
        self.misconfigured += other.misconfigured;
        self.extra += other.extra;
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
    }
}

impl CycleReport {
    /// Starts a report for a new cycle.
    #[must_use]
    pub fn new(project: &str, environment: &str, mode: CycleMode) -> Self {
        Self {
            cycle_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            finished_at: None,
            project: project.to_string(),
            environment: environment.to_string(),
            mode,
            generation: None,
            origin: None,
            stage: CycleStage::Idle,
            drift_detected: false,
            summary: DriftSummary::default(),
            drift: Vec::new(),
            inspection_errors: Vec::new(),
            plan: None,
            execution: None,
            residual_drift: None,
            verification_errors: Vec::new(),
            expected: BTreeMap::new(),
            observed: BTreeMap::new(),
        }
    }

    /// Records the drift entries and their summary.
    pub fn set_drift(&mut self, entries: Vec<DriftEntry>) {
        self.summary = DriftSummary::from_entries(&entries);
        self.drift_detected = !entries.is_empty();
        self.drift = entries;
    }

    /// Records the outcome of the verification pass.
    ///
    /// A resource the pass could not observe is not known to have converged,
    /// so its original drift entries stay in the residual drift.
    pub fn set_verification(&mut self, residual: Vec<DriftEntry>, errors: Vec<InspectionFailure>) {
        let unverified: BTreeSet<Option<&str>> =
            errors.iter().map(|e| e.resource_id.as_deref()).collect();
        let all_unverified = unverified.contains(&None);

        let mut residual = residual;
        for entry in &self.drift {
            let unobserved =
                all_unverified || unverified.contains(&Some(entry.resource_id.as_str()));
            let present = residual
                .iter()
                .any(|r| r.resource_id == entry.resource_id && r.field == entry.field);
            if unobserved && !present {
                residual.push(entry.clone());
            }
        }
        residual.sort_by(|a, b| (&a.resource_id, &a.field).cmp(&(&b.resource_id, &b.field)));

        self.residual_drift = Some(residual);
        self.verification_errors = errors;
    }

    /// Returns true if the cycle aborted.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.stage, CycleStage::Failed(_))
    }

    /// Returns the abort reason, if the cycle failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match &self.stage {
            CycleStage::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Returns true if inspection or verification degraded any resource.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.inspection_errors.is_empty() || !self.verification_errors.is_empty()
    }

    /// Returns true if any remediation action failed.
    #[must_use]
    pub fn has_execution_failures(&self) -> bool {
        self.execution.as_ref().is_some_and(ExecutionReport::has_failures)
    }

    /// Returns true if drift is still present at the end of the cycle.
    ///
    /// After a verified remediation this is the residual drift; otherwise
    /// it is the drift found.
    #[must_use]
    pub fn drift_remains(&self) -> bool {
        self.residual_drift
            .as_ref()
            .map_or(self.drift_detected, |residual| !residual.is_empty())
    }

    /// Process exit code for this report.
    ///
    /// Errors, degraded inspections and failed actions win over drift.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.is_failed() || self.is_degraded() || self.has_execution_failures() {
            EXIT_ERROR
        } else if self.drift_remains() {
            EXIT_DRIFT
        } else {
            EXIT_CLEAN
        }
    }

    /// Archive file name for this report.
    #[must_use]
    pub fn archive_name(&self) -> String {
        format!("{REPORT_PREFIX}{}.json", self.timestamp.format(REPORT_TIME_FORMAT))
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Per-day drift counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDrift {
    /// Calendar day (UTC).
    pub date: NaiveDate,
    /// Cycles that started that day.
    pub cycles: usize,
    /// Cycles that found drift.
    pub drift_cycles: usize,
    /// Mean drift entries per cycle.
    pub avg_entries: f64,
}

/// Drift statistics over archived reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStats {
    /// Start of the window.
    pub since: DateTime<Utc>,
    /// Cycles in the window.
    pub cycles: usize,
    /// Cycles that found drift.
    pub drift_cycles: usize,
    /// Cycles that aborted.
    pub failed_cycles: usize,
    /// Cycles with degraded inspection or verification.
    pub degraded_cycles: usize,
    /// Share of cycles that found drift, between 0 and 1.
    pub drift_rate: f64,
    /// Mean drift entries per cycle.
    pub avg_entries: f64,
    /// Largest number of drift entries in one cycle.
    pub max_entries: usize,
    /// Drift counts summed over the window.
    pub totals: DriftSummary,
    /// Counts per day, oldest first.
    pub daily: Vec<DailyDrift>,
}

impl ReportStats {
    /// Aggregates the reports that started at or after `since`.
    #[must_use]
    pub fn from_reports(reports: &[CycleReport], since: DateTime<Utc>) -> Self {
        let window: Vec<&CycleReport> = reports.iter().filter(|r| r.timestamp >= since).collect();

        let mut totals = DriftSummary::default();
        let mut by_day: BTreeMap<NaiveDate, (usize, usize, usize)> = BTreeMap::new();
        for report in &window {
            totals.add(&report.summary);
            let day = by_day.entry(report.timestamp.date_naive()).or_default();
            day.0 += 1;
            day.1 += usize::from(report.drift_detected);
            day.2 += report.summary.total;
        }

        let cycles = window.len();
        let drift_cycles = window.iter().filter(|r| r.drift_detected).count();

        Self {
            since,
            cycles,
            drift_cycles,
            failed_cycles: window.iter().filter(|r| r.is_failed()).count(),
            degraded_cycles: window.iter().filter(|r| r.is_degraded()).count(),
            drift_rate: ratio(drift_cycles, cycles),
            avg_entries: ratio(totals.total, cycles),
            max_entries: window.iter().map(|r| r.summary.total).max().unwrap_or(0),
            totals,
            daily: by_day
                .into_iter()
                .map(|(date, (cycles, drift_cycles, entries))| DailyDrift {
                    date,
                    cycles,
                    drift_cycles,
                    avg_entries: ratio(entries, cycles),
                })
                .collect(),
        }
    }
}

/// Archived reports bundled into one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportExport {
    /// When the export was written.
    pub exported_at: DateTime<Utc>,
    /// Start of the window, if limited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Number of reports.
    pub total_reports: usize,
    /// Reports, newest first.
    pub reports: Vec<CycleReport>,
}

impl ReportExport {
    /// Bundles the reports that started at or after `since`.
    #[must_use]
    pub fn new(reports: Vec<CycleReport>, since: Option<DateTime<Utc>>) -> Self {
        let reports: Vec<CycleReport> = reports
            .into_iter()
            .filter(|r| since.is_none_or(|t| r.timestamp >= t))
            .collect();
        Self {
            exported_at: Utc::now(),
            since,
            total_reports: reports.len(),
            reports,
        }
    }
}

/// Loads archived cycle reports, newest first.
///
/// Archive entries that do not parse as cycle reports are skipped with a
/// warning.
///
/// # Errors
///
/// Returns an error if the archive cannot be listed.
pub async fn load_archived(store: &dyn WorkspaceStore) -> Result<Vec<CycleReport>> {
    let mut reports = Vec::new();
    for archived in store.list_reports().await? {
        let parsed = match store.load_report(&archived.name).await {
            Ok(content) => serde_json::from_str::<CycleReport>(&content).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(report) => reports.push(report),
            Err(e) => warn!("Skipping archived report {}: {}", archived.name, e),
        }
    }
    Ok(reports)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

impl std::fmt::Display for CycleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Detect => "detect",
            Self::DryRun => "dry-run",
            Self::Remediate => "remediate",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Inspecting => write!(f, "inspecting"),
            Self::Diffing => write!(f, "diffing"),
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::Verifying => write!(f, "verifying"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: DriftKind, impact: Impact) -> DriftEntry {
        DriftEntry {
            resource_id: String::from("web-1"),
            resource_type: ResourceType::WebServer,
            field: String::from("running"),
            declared: Some(String::from("true")),
            observed: Some(String::from("false")),
            kind,
            impact,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = DriftSummary::from_entries(&[
            entry(DriftKind::Misconfigured, Impact::High),
            entry(DriftKind::Missing, Impact::High),
            entry(DriftKind::Extra, Impact::Low),
        ]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.extra, 1);
        assert_eq!(summary.high, 2);
        assert_eq!(summary.medium, 0);
    }

    #[test]
    fn test_exit_codes() {
        let mut report = CycleReport::new("shop", "prod", CycleMode::Detect);
        assert_eq!(report.exit_code(), EXIT_CLEAN);

        report.set_drift(vec![entry(DriftKind::Misconfigured, Impact::High)]);
        assert_eq!(report.exit_code(), EXIT_DRIFT);

        report.inspection_errors.push(InspectionFailure {
            resource_id: Some(String::from("db-1")),
            message: String::from("timed out"),
        });
        assert_eq!(report.exit_code(), EXIT_ERROR);

        report.inspection_errors.clear();
        report.residual_drift = Some(Vec::new());
        assert_eq!(report.exit_code(), EXIT_CLEAN);

        let mut failed = CycleReport::new("shop", "prod", CycleMode::Detect);
        failed.stage = CycleStage::Failed(String::from("state unavailable"));
        assert_eq!(failed.failure(), Some("state unavailable"));
        assert_eq!(failed.exit_code(), EXIT_ERROR);
    }

    #[test]
    fn test_json_shape() {
        let mut report = CycleReport::new("shop", "prod", CycleMode::Detect);
        report.set_drift(vec![entry(DriftKind::Misconfigured, Impact::High)]);

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["drift_detected"], true);
        assert_eq!(value["summary"]["misconfigured"], 1);
        assert_eq!(value["drift"][0]["kind"], "misconfigured");
        assert_eq!(value["stage"]["stage"], "idle");
        assert!(report.archive_name().starts_with("drift-report-"));
    }

    fn entry_for(id: &str, field: &str) -> DriftEntry {
        DriftEntry {
            resource_id: id.to_string(),
            field: field.to_string(),
            ..entry(DriftKind::Misconfigured, Impact::High)
        }
    }

    #[test]
    fn test_unverified_resources_keep_their_drift() {
        let mut report = CycleReport::new("shop", "prod", CycleMode::Remediate);
        report.set_drift(vec![entry_for("db-1", "running"), entry_for("web-1", "running")]);

        let errors = vec![InspectionFailure {
            resource_id: Some(String::from("db-1")),
            message: String::from("timed out"),
        }];
        report.set_verification(Vec::new(), errors);

        let residual = report.residual_drift.as_ref().unwrap();
        assert_eq!(residual.len(), 1);
        assert_eq!(residual[0].resource_id, "db-1");
        assert!(report.is_degraded());
        assert!(report.drift_remains());
        assert_eq!(report.exit_code(), EXIT_ERROR);
    }

    #[test]
    fn test_unreachable_verification_keeps_all_drift() {
        let mut report = CycleReport::new("shop", "prod", CycleMode::Remediate);
        report.set_drift(vec![entry_for("web-2", "ports"), entry_for("web-1", "running")]);

        let errors = vec![InspectionFailure {
            resource_id: None,
            message: String::from("daemon down"),
        }];
        report.set_verification(vec![entry_for("web-1", "running")], errors);

        let residual: Vec<(&str, &str)> = report
            .residual_drift
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.resource_id.as_str(), e.field.as_str()))
            .collect();
        assert_eq!(residual, vec![("web-1", "running"), ("web-2", "ports")]);
    }

    #[test]
    fn test_clean_verification_is_not_degraded() {
        let mut report = CycleReport::new("shop", "prod", CycleMode::Remediate);
        report.set_drift(vec![entry_for("web-1", "running")]);
        report.set_verification(Vec::new(), Vec::new());

        assert!(!report.is_degraded());
        assert_eq!(report.exit_code(), EXIT_CLEAN);
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert!(value.get("verification_errors").is_none());
    }

    fn report_at(day: u32, hour: u32, entries: Vec<DriftEntry>) -> CycleReport {
        let mut report = CycleReport::new("shop", "prod", CycleMode::Detect);
        report.timestamp = NaiveDate::from_ymd_opt(2026, 3, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
            .and_utc();
        report.set_drift(entries);
        report
    }

    #[test]
    fn test_stats_over_window() {
        let mut failed = report_at(3, 12, Vec::new());
        failed.stage = CycleStage::Failed(String::from("state unavailable"));
        let reports = vec![
            report_at(1, 0, vec![entry(DriftKind::Missing, Impact::High)]),
            report_at(2, 8, vec![entry(DriftKind::Misconfigured, Impact::High)]),
            report_at(
                2,
                9,
                vec![
                    entry(DriftKind::Misconfigured, Impact::Medium),
                    entry(DriftKind::Extra, Impact::Low),
                ],
            ),
            report_at(2, 10, Vec::new()),
            failed,
        ];

        let since = NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
            .and_utc();
        let stats = ReportStats::from_reports(&reports, since);

        assert_eq!(stats.cycles, 4);
        assert_eq!(stats.drift_cycles, 2);
        assert_eq!(stats.failed_cycles, 1);
        assert!((stats.drift_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.max_entries, 2);
        assert_eq!(stats.totals.total, 3);
        assert_eq!(stats.totals.high, 1);
        assert_eq!(stats.totals.missing, 0);
        assert_eq!(stats.daily.len(), 2);
        assert_eq!(stats.daily[0].cycles, 3);
        assert!((stats.daily[0].avg_entries - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.daily[1].drift_cycles, 0);
    }

    #[test]
    fn test_empty_stats() {
        let stats = ReportStats::from_reports(&[], Utc::now());
        assert_eq!(stats.cycles, 0);
        assert!(stats.drift_rate.abs() < f64::EPSILON);
        assert!(stats.daily.is_empty());
    }

    #[tokio::test]
    async fn test_load_archived_skips_foreign_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let workspace = crate::state::LocalWorkspace::new(temp.path());

        let older = report_at(1, 0, Vec::new());
        let newer = report_at(2, 0, vec![entry(DriftKind::Missing, Impact::High)]);
        for report in [&older, &newer] {
            workspace
                .archive_report(&report.archive_name(), &report.to_json().unwrap())
                .await
                .unwrap();
        }
        workspace.archive_report("notes.json", "[1, 2]").await.unwrap();

        let loaded = load_archived(&workspace).await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.cycle_id.as_str()).collect();
        assert_eq!(ids, vec![newer.cycle_id.as_str(), older.cycle_id.as_str()]);

        let export = ReportExport::new(loaded, Some(newer.timestamp));
        assert_eq!(export.total_reports, 1);
        assert_eq!(export.reports[0].cycle_id, newer.cycle_id);
    }
}
