//! Drift cycle engine.
//!
//! Runs one cycle at a time through the stages
//! `Idle → Inspecting → Diffing → Planning → Executing → Verifying → Idle`.
//! A stage failure ends the cycle as `Failed(reason)` and is recorded in the
//! report; the next cycle starts fresh. Cycles are exclusive within the
//! process (async mutex) and across processes (workspace lock file, kept
//! alive while the stages run).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{ConfigParser, EngineConfig};
use crate::declared::{reader_from_config, DeclaredState, ResourceType, StateReader};
use crate::error::{DriftError, Result, StateError};
use crate::inspect::{query_from_config, InfraQuery, LiveInspector, ObservedResource};
use crate::notify::Notifier;
use crate::planner::{DiffEngine, ExecuteOptions, Executor, RemediationPlanner};
use crate::provision::{provisioner_from_config, Provisioner, RetryPolicy};
use crate::report::{CycleMode, CycleReport, CycleStage};
use crate::state::{
    generate_holder_id, LocalWorkspace, WorkspaceStore, LOCK_EXPIRY_SECS, WORKSPACE_DIR,
};

/// Default interval between lock refreshes while a cycle runs.
pub const LOCK_REFRESH_INTERVAL: Duration =
    Duration::from_secs(LOCK_EXPIRY_SECS.unsigned_abs() / 3);

/// Filesystem locations used by an engine, resolved against the config directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    /// Declared state manifest, state file or Terraform directory.
    pub state: PathBuf,
    /// Workspace directory.
    pub workspace: PathBuf,
    /// Provisioner working directory.
    pub provisioner_dir: PathBuf,
    /// Observed-state snapshot, for the snapshot inspector.
    pub snapshot: Option<PathBuf>,
}

impl EnginePaths {
    /// Resolves configured paths relative to `base_dir`.
    #[must_use]
    pub fn resolve(config: &EngineConfig, base_dir: &Path) -> Self {
        let parser = ConfigParser::new().with_base_path(base_dir);

        let state = parser.resolve(&config.state.path);
        let workspace = config
            .workspace
            .path
            .as_deref()
            .map_or_else(|| base_dir.join(WORKSPACE_DIR), |p| parser.resolve(p));

        // Terraform works from the directory holding the state by default.
        let provisioner_dir = config
            .remediation
            .provisioner
            .working_dir
            .as_deref()
            .map_or_else(
                || {
                    if state.is_dir() {
                        state.clone()
                    } else {
                        state.parent().map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf)
                    }
                },
                |p| parser.resolve(p),
            );

        let snapshot = config
            .inspector
            .snapshot_path
            .as_deref()
            .map(|p| parser.resolve(p));

        Self {
            state,
            workspace,
            provisioner_dir,
            snapshot,
        }
    }
}

/// Pluggable collaborators of an engine.
pub struct EngineParts {
    /// Declared state source.
    pub reader: Box<dyn StateReader>,
    /// Live infrastructure query.
    pub query: Arc<dyn InfraQuery>,
    /// Provisioner applying corrective actions.
    pub provisioner: Arc<dyn Provisioner>,
    /// Workspace for locks, ledger and reports.
    pub workspace: Box<dyn WorkspaceStore>,
}

/// The drift detection and remediation engine.
pub struct Engine {
    config: EngineConfig,
    reader: Box<dyn StateReader>,
    inspector: LiveInspector,
    diff: DiffEngine,
    planner: RemediationPlanner,
    executor: Executor,
    workspace: Box<dyn WorkspaceStore>,
    notifier: Option<Notifier>,
    holder: String,
    lock_refresh: Duration,
    cycle_lock: Mutex<()>,
    stage: watch::Sender<CycleStage>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("project", &self.config.qualified_name())
            .field("holder", &self.holder)
            .field("stage", &*self.stage.borrow())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine from explicit collaborators.
    #[must_use]
    pub fn new(config: EngineConfig, parts: EngineParts) -> Self {
        let inspector = LiveInspector::new(
            parts.query,
            Duration::from_secs(config.inspector.query_timeout_secs),
            config.inspector.concurrency,
        );
        let diff = DiffEngine::from_config(&config.tracking);
        let executor = Executor::new(parts.provisioner, inspector.clone(), diff.clone())
            .with_retry(RetryPolicy::from(&config.remediation.retry));
        let planner = RemediationPlanner::new(config.remediation.policy.clone());
        let (stage, _) = watch::channel(CycleStage::Idle);

        Self {
            config,
            reader: parts.reader,
            inspector,
            diff,
            planner,
            executor,
            workspace: parts.workspace,
            notifier: None,
            holder: generate_holder_id(),
            lock_refresh: LOCK_REFRESH_INTERVAL,
            cycle_lock: Mutex::new(()),
            stage,
        }
    }

    /// Creates an engine with the backends selected by the configuration.
    ///
    /// Relative paths are resolved against `base_dir`, normally the
    /// directory holding the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be built from the configuration.
    pub fn from_config(config: EngineConfig, base_dir: &Path) -> Result<Self> {
        let paths = EnginePaths::resolve(&config, base_dir);
        debug!("Resolved engine paths: {:?}", paths);

        let parts = EngineParts {
            reader: reader_from_config(&config.state, paths.state),
            query: query_from_config(&config, paths.snapshot)?,
            provisioner: provisioner_from_config(
                &config.remediation.provisioner,
                paths.provisioner_dir,
            )?,
            workspace: Box::new(LocalWorkspace::new(paths.workspace)),
        };

        let notifier = config
            .notifications
            .clone()
            .map(Notifier::new)
            .transpose()?;

        Ok(Self::new(config, parts).with_notifier(notifier))
    }

    /// Sets the webhook notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Option<Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets how often the workspace lock is refreshed during a cycle.
    #[must_use]
    pub fn with_lock_refresh(mut self, interval: Duration) -> Self {
        self.lock_refresh = interval.max(Duration::from_millis(1));
        self
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the current cycle stage.
    #[must_use]
    pub fn stage(&self) -> CycleStage {
        self.stage.borrow().clone()
    }

    /// Subscribes to stage transitions.
    #[must_use]
    pub fn subscribe_stage(&self) -> watch::Receiver<CycleStage> {
        self.stage.subscribe()
    }

    /// Runs one cycle.
    ///
    /// Stage failures are recorded in the returned report rather than
    /// returned as errors.
    ///
    /// # Errors
    ///
    /// Returns `StateError::CycleBusy` if a cycle is already running in this
    /// process, `StateError::LockedByOther` if another process holds the
    /// workspace lock, or a workspace error if the lock cannot be handled.
    pub async fn run_cycle(&self, mode: CycleMode, cancel: &CancelToken) -> Result<CycleReport> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            return Err(StateError::CycleBusy.into());
        };

        let mut report = CycleReport::new(
            &self.config.project.name,
            &self.config.project.environment,
            mode,
        );
        self.enter(&mut report, CycleStage::Idle);
        info!(
            "Starting {} cycle {} for {}",
            mode,
            report.cycle_id,
            self.config.qualified_name()
        );

        let declared = match self.reader.load().await {
            Ok(declared) => declared,
            Err(e) => {
                self.fail(&mut report, e.to_string());
                return Ok(self.finish(report).await);
            }
        };
        report.generation = Some(declared.generation.clone());
        report.origin = Some(declared.origin.clone());
        report.expected = declared.count_by_type();

        let lock = self
            .workspace
            .acquire_lock(&self.holder, Some(&declared.generation))
            .await?;

        // The lock is kept alive for as long as the stages run.
        let outcome = tokio::select! {
            outcome = self.run_stages(&mut report, &declared, cancel) => outcome,
            () = self.keep_lock_alive(&lock.lock_id) => Ok(()),
        };

        if let Err(reason) = outcome {
            self.fail(&mut report, reason);
        } else {
            self.enter(&mut report, CycleStage::Idle);
        }

        if let Err(e) = self.workspace.release_lock(&lock.lock_id).await {
            error!("Failed to release cycle lock: {}", e);
        }

        Ok(self.finish(report).await)
    }

    /// Runs cycles every `interval` until cancelled.
    ///
    /// Lock contention and workspace errors are logged and the loop goes on.
    /// `on_report` receives every completed report.
    pub async fn run_loop(
        &self,
        mode: CycleMode,
        interval: Duration,
        cancel: &CancelToken,
        mut on_report: impl FnMut(&CycleReport) + Send,
    ) {
        info!("Watching {} every {:?}", self.config.qualified_name(), interval);

        while !cancel.is_cancelled() {
            match self.run_cycle(mode, cancel).await {
                Ok(report) => on_report(&report),
                Err(DriftError::State(
                    e @ (StateError::LockedByOther { .. } | StateError::CycleBusy),
                )) => {
                    warn!("Skipping cycle: {}", e);
                }
                Err(e) if e.is_retryable() => warn!("Cycle failed, retrying next cycle: {}", e),
                Err(e) => error!("Cycle failed: {}", e),
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        info!("Watch loop stopped");
    }

    async fn run_stages(
        &self,
        report: &mut CycleReport,
        declared: &DeclaredState,
        cancel: &CancelToken,
    ) -> std::result::Result<(), String> {
        self.enter(report, CycleStage::Inspecting);
        let inspection = self.inspector.inspect(declared).await;
        if inspection.is_degraded() {
            warn!("Inspection degraded: {} errors", inspection.errors.len());
        }
        report.observed = count_observed(&inspection.resources);
        report.inspection_errors = inspection.errors;
        checkpoint(cancel)?;

        self.enter(report, CycleStage::Diffing);
        let entries = self.diff.diff(declared, &inspection.resources);
        info!("Found {} drift entries", entries.len());
        report.set_drift(entries);
        checkpoint(cancel)?;

        self.enter(report, CycleStage::Planning);
        let plan = self
            .planner
            .plan(declared, &report.drift)
            .map_err(|e| e.to_string())?;
        let remediate = report.mode != CycleMode::Detect && !plan.is_noop();
        report.plan = Some(plan);

        if !remediate {
            return Ok(());
        }
        checkpoint(cancel)?;

        self.enter(report, CycleStage::Executing);
        let dry_run = report.mode == CycleMode::DryRun;
        let mut ledger = self.workspace.load_ledger().await.map_err(|e| e.to_string())?;
        let options = ExecuteOptions {
            dry_run,
            cancel: cancel.clone(),
        };
        let Some(plan) = report.plan.as_ref() else {
            return Ok(());
        };
        let execution = self.executor.apply(plan, declared, &mut ledger, &options).await;
        let applied = !dry_run && execution.outcomes.iter().any(|o| o.attempts > 0);
        report.execution = Some(execution);

        if dry_run {
            return Ok(());
        }
        if let Err(e) = self.workspace.save_ledger(&ledger).await {
            error!("Failed to save ledger: {}", e);
        }

        if applied {
            self.enter(report, CycleStage::Verifying);
            let after = self.inspector.inspect(declared).await;
            let residual = self.diff.diff(declared, &after.resources);
            if after.is_degraded() {
                warn!("Verification degraded: {} errors", after.errors.len());
            }
            report.set_verification(residual, after.errors);
            match report.residual_drift.as_ref().map_or(0, Vec::len) {
                0 => info!("Infrastructure converged"),
                n => warn!("{} drift entries remain after remediation", n),
            }
        }

        Ok(())
    }

    /// Refreshes the workspace lock until the caller stops polling.
    ///
    /// Never completes; a failed refresh is logged and retried.
    async fn keep_lock_alive(&self, lock_id: &str) {
        loop {
            tokio::time::sleep(self.lock_refresh).await;
            match self.workspace.refresh_lock(lock_id).await {
                Ok(lock) => debug!("Cycle lock held until {}", lock.expires_at),
                Err(e) => warn!("Failed to refresh cycle lock: {}", e),
            }
        }
    }

    fn enter(&self, report: &mut CycleReport, stage: CycleStage) {
        debug!("Cycle {} entering {}", report.cycle_id, stage);
        report.stage = stage.clone();
        self.stage.send_replace(stage);
    }

    fn fail(&self, report: &mut CycleReport, reason: String) {
        error!("Cycle {} failed: {}", report.cycle_id, reason);
        self.enter(report, CycleStage::Failed(reason));
    }

    /// Archives the report, prunes old ones and notifies.
    async fn finish(&self, mut report: CycleReport) -> CycleReport {
        report.finished_at = Some(chrono::Utc::now());

        match report.to_json() {
            Ok(content) => {
                let name = report.archive_name();
                if let Err(e) = self.workspace.archive_report(&name, &content).await {
                    warn!("Failed to archive report: {}", e);
                } else {
                    self.prune_archive().await;
                }
            }
            Err(e) => warn!("Failed to serialize report: {}", e),
        }

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&report).await {
                warn!("Failed to send notification: {}", e);
            }
        }

        info!(
            "Cycle {} finished: {} (exit code {})",
            report.cycle_id,
            report.stage,
            report.exit_code()
        );
        report
    }

    /// Applies the count and age retention limits to the report archive.
    async fn prune_archive(&self) {
        let retention = &self.config.workspace;
        if let Err(e) = self.workspace.prune_reports(retention.keep_reports).await {
            warn!("Failed to prune reports: {}", e);
        }

        if let Some(days) = retention.max_report_age_days {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
            if let Err(e) = self.workspace.prune_reports_before(cutoff).await {
                warn!("Failed to prune expired reports: {}", e);
            }
        }
    }
}

fn checkpoint(cancel: &CancelToken) -> std::result::Result<(), String> {
    if cancel.is_cancelled() {
        Err(String::from("cancelled"))
    } else {
        Ok(())
    }
}

fn count_observed(resources: &BTreeMap<String, ObservedResource>) -> BTreeMap<ResourceType, usize> {
    let mut counts = BTreeMap::new();
    for resource in resources.values().filter(|r| !r.is_unknown()) {
        *counts.entry(resource.resource_type).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r"
project:
  name: shop
  environment: prod
state:
  source: manifest
  path: declared.yaml
inspector:
  backend: snapshot
  snapshot_path: observed.yaml
remediation:
  provisioner:
    backend: command
    program: /bin/true
";

    #[test]
    fn test_paths_resolve_against_base_dir() {
        let config = ConfigParser::new().parse_yaml(CONFIG, None).unwrap();
        let base = Path::new("/srv/infra");
        let paths = EnginePaths::resolve(&config, base);

        assert_eq!(paths.state, base.join("declared.yaml"));
        assert_eq!(paths.workspace, base.join(WORKSPACE_DIR));
        assert_eq!(paths.provisioner_dir, base);
        assert_eq!(paths.snapshot, Some(base.join("observed.yaml")));
    }

    #[tokio::test]
    async fn test_missing_state_fails_cycle_before_diffing() {
        let temp = TempDir::new().unwrap();
        let config = ConfigParser::new().parse_yaml(CONFIG, None).unwrap();
        let engine = Engine::from_config(config, temp.path()).unwrap();

        let report = engine
            .run_cycle(CycleMode::Detect, &CancelToken::new())
            .await
            .unwrap();

        assert!(report.is_failed());
        assert!(report.drift.is_empty());
        assert_eq!(report.exit_code(), crate::report::EXIT_ERROR);
        assert!(matches!(engine.stage(), CycleStage::Failed(_)));
    }
}
