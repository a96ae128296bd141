//! Plan executor.
//!
//! Applies remediation actions one at a time through the provisioner,
//! retrying transient failures with bounded exponential backoff, and
//! verifies each applied action by re-inspecting the resource and diffing
//! it against its declaration. One action's failure never stops the others.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::declared::DeclaredState;
use crate::error::{ExecutionError, ProvisionError};
use crate::inspect::LiveInspector;
use crate::provision::{ApplyMode, Provisioner, RetryPolicy};
use crate::state::{Ledger, LedgerEntry};

use super::diff::DiffEngine;
use super::plan::{ActionKind, RemediationAction, RemediationPlan};

/// Executor for remediation plans.
pub struct Executor {
    /// Provisioner applying declarations.
    provisioner: Arc<dyn Provisioner>,
    /// Inspector used for verification.
    inspector: LiveInspector,
    /// Diff engine used for verification.
    diff: DiffEngine,
    /// Retry policy for transient failures.
    retry: RetryPolicy,
    /// Whether applied actions are verified.
    verify: bool,
}

/// Options for one execution pass.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Plan only; never call the provisioner.
    pub dry_run: bool,
    /// Stops scheduling further actions once cancelled.
    pub cancel: CancelToken,
}

/// Final status of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Applied and verified.
    Applied,
    /// Already applied in an earlier cycle; provisioner not called.
    AlreadyApplied,
    /// Report-only action.
    Skipped,
    /// Not applied because of a dry run.
    DryRun,
    /// Not started because the cycle was cancelled.
    Cancelled,
    /// Failed.
    Failed,
}

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Target resource id.
    pub resource_id: String,
    /// Action kind.
    pub kind: ActionKind,
    /// Idempotency key.
    pub idempotency_key: String,
    /// Final status.
    pub status: OutcomeStatus,
    /// Provisioner attempts made.
    pub attempts: u32,
    /// Error, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Per-action outcomes in plan order.
    pub outcomes: Vec<ActionOutcome>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("inspector", &self.inspector)
            .field("retry", &self.retry)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        inspector: LiveInspector,
        diff: DiffEngine,
    ) -> Self {
        Self {
            provisioner,
            inspector,
            diff,
            retry: RetryPolicy::default(),
            verify: true,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether applied actions are verified.
    #[must_use]
    pub const fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Executes a plan.
    ///
    /// Verified actions are recorded in the ledger.
    pub async fn apply(
        &self,
        plan: &RemediationPlan,
        declared: &DeclaredState,
        ledger: &mut Ledger,
        options: &ExecuteOptions,
    ) -> ExecutionReport {
        info!(
            "Executing plan with {} actions{}",
            plan.actions.len(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        let mut report = ExecutionReport {
            dry_run: options.dry_run,
            outcomes: Vec::with_capacity(plan.actions.len()),
        };

        for action in &plan.actions {
            let outcome = if options.cancel.is_cancelled() {
                debug!("Cancelled before {}", action.resource_id);
                ActionOutcome::new(action, OutcomeStatus::Cancelled, 0)
            } else {
                self.execute_action(action, declared, ledger, options.dry_run).await
            };

            match outcome.status {
                OutcomeStatus::Failed => error!(
                    "{} {} failed: {}",
                    action.kind,
                    action.resource_id,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
                status => debug!("{} {}: {:?}", action.kind, action.resource_id, status),
            }

            report.outcomes.push(outcome);
        }

        info!(
            "Execution finished: {} applied, {} already applied, {} skipped, {} failed",
            report.count(OutcomeStatus::Applied),
            report.count(OutcomeStatus::AlreadyApplied),
            report.count(OutcomeStatus::Skipped),
            report.count(OutcomeStatus::Failed)
        );

        report
    }

    async fn execute_action(
        &self,
        action: &RemediationAction,
        declared: &DeclaredState,
        ledger: &mut Ledger,
        dry_run: bool,
    ) -> ActionOutcome {
        let mode = match action.kind {
            ActionKind::Ignore => return ActionOutcome::new(action, OutcomeStatus::Skipped, 0),
            ActionKind::Recreate => ApplyMode::Replace,
            ActionKind::Reconfigure => ApplyMode::Target,
        };

        if dry_run {
            info!("[dry-run] would {} {}", action.kind, action.provision_target());
            return ActionOutcome::new(action, OutcomeStatus::DryRun, 0);
        }

        if ledger.contains(&action.idempotency_key) {
            if self.verify_action(action, declared).await.is_ok() {
                info!(
                    "{} {} already applied ({})",
                    action.kind, action.resource_id, action.idempotency_key
                );
                return ActionOutcome::new(action, OutcomeStatus::AlreadyApplied, 0);
            }
            debug!("Ledger entry for {} is stale, applying again", action.resource_id);
        }

        let attempts = match self.apply_with_retry(action, mode).await {
            Ok(attempts) => attempts,
            Err((attempts, e)) => return ActionOutcome::failed(action, attempts, &e),
        };

        if self.verify {
            if let Err(e) = self.verify_action(action, declared).await {
                return ActionOutcome::failed(action, attempts, &e);
            }
        }

        ledger.record(LedgerEntry::new(
            &action.idempotency_key,
            &action.resource_id,
            action.kind,
            &declared.generation,
        ));
        info!("{} {} applied", action.kind, action.resource_id);
        ActionOutcome::new(action, OutcomeStatus::Applied, attempts)
    }

    /// Calls the provisioner until success, a non-transient failure, or the
    /// attempt budget runs out. Returns the attempts made.
    async fn apply_with_retry(
        &self,
        action: &RemediationAction,
        mode: ApplyMode,
    ) -> Result<u32, (u32, ExecutionError)> {
        let targets = vec![action.provision_target().to_string()];
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.provisioner.apply(&targets, mode).await {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Transient failure on {} (attempt {}/{}), retrying in {:?}: {}",
                        action.resource_id, attempt, self.retry.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((attempt, Self::execution_error(action, attempt, &e))),
            }
        }
    }

    fn execution_error(
        action: &RemediationAction,
        attempts: u32,
        e: &ProvisionError,
    ) -> ExecutionError {
        if e.is_transient() {
            ExecutionError::RetriesExhausted {
                resource: action.resource_id.clone(),
                attempts,
                message: e.to_string(),
            }
        } else {
            ExecutionError::Failed {
                resource: action.resource_id.clone(),
                message: e.to_string(),
            }
        }
    }

    /// Re-inspects the target and checks it no longer drifts.
    ///
    /// Actions on undeclared resources have nothing to converge to and pass.
    async fn verify_action(
        &self,
        action: &RemediationAction,
        declared: &DeclaredState,
    ) -> Result<(), ExecutionError> {
        let Some(declaration) = declared.get(&action.resource_id) else {
            return Ok(());
        };

        let observed = self
            .inspector
            .inspect_one(declaration)
            .await
            .map_err(|e| ExecutionError::Failed {
                resource: action.resource_id.clone(),
                message: format!("verification inspection failed: {e}"),
            })?;

        if observed.as_ref().is_some_and(|o| o.is_unknown()) {
            return Err(ExecutionError::VerificationFailed {
                resource: action.resource_id.clone(),
                remaining: 1,
            });
        }

        let remaining = self.diff.diff_resource(declaration, observed.as_ref());
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(ExecutionError::VerificationFailed {
                resource: action.resource_id.clone(),
                remaining: remaining.len(),
            })
        }
    }
}

impl ActionOutcome {
    fn new(action: &RemediationAction, status: OutcomeStatus, attempts: u32) -> Self {
        Self {
            resource_id: action.resource_id.clone(),
            kind: action.kind,
            idempotency_key: action.idempotency_key.clone(),
            status,
            attempts,
            error: None,
        }
    }

    fn failed(action: &RemediationAction, attempts: u32, error: &ExecutionError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(action, OutcomeStatus::Failed, attempts)
        }
    }
}

impl ExecutionReport {
    /// Counts outcomes with the given status.
    #[must_use]
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Returns true if any action failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == OutcomeStatus::Failed)
    }

    /// Failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.status == OutcomeStatus::Failed)
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already applied",
            Self::Skipped => "skipped",
            Self::DryRun => "dry run",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declared::{Attributes, ResourceDeclaration, ResourceType};
    use crate::inspect::{InfraQuery, ObservedResource, ResourceRef, ResourceStatus};
    use crate::planner::RemediationPlanner;
    use crate::provision::MockProvisioner;
    use crate::error::InspectionError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Query over a shared map the provisioner fakes can mutate.
    #[derive(Default)]
    struct SharedQuery(Arc<Mutex<BTreeMap<String, ObservedResource>>>);

    #[async_trait]
    impl InfraQuery for SharedQuery {
        async fn list_resources(&self) -> Result<Vec<ResourceRef>, InspectionError> {
            let map = self.0.lock().unwrap();
            Ok(map.values().map(|r| ResourceRef::new(r.id.clone(), r.resource_type)).collect())
        }

        async fn query(
            &self,
            resource: &ResourceRef,
        ) -> Result<Option<ObservedResource>, InspectionError> {
            Ok(self.0.lock().unwrap().get(&resource.id).cloned())
        }
    }

    fn running(id: &str, running: bool) -> ObservedResource {
        let status = if running { ResourceStatus::Running } else { ResourceStatus::Stopped };
        ObservedResource::new(
            id,
            ResourceType::WebServer,
            status,
            Attributes {
                running: Some(running),
                ..Attributes::default()
            },
        )
    }

    fn declared() -> DeclaredState {
        DeclaredState::from_declarations(
            "test",
            vec![ResourceDeclaration::new("web-1", ResourceType::WebServer).with_attributes(
                Attributes {
                    running: Some(true),
                    ..Attributes::default()
                },
            )],
        )
        .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    type Shared = Arc<Mutex<BTreeMap<String, ObservedResource>>>;

    fn shared(observed_running: bool) -> Shared {
        let mut map = BTreeMap::new();
        map.insert(String::from("web-1"), running("web-1", observed_running));
        Arc::new(Mutex::new(map))
    }

    fn setup(provisioner: MockProvisioner, shared: &Shared) -> (Executor, RemediationPlan) {
        let inspector = LiveInspector::new(
            Arc::new(SharedQuery(Arc::clone(shared))),
            Duration::from_secs(1),
            2,
        );
        let executor = Executor::new(Arc::new(provisioner), inspector, DiffEngine::new())
            .with_retry(fast_retry());

        let declared = declared();
        let observed = shared.lock().unwrap().clone();
        let entries = DiffEngine::new().diff(&declared, &observed);
        let plan = RemediationPlanner::default().plan(&declared, &entries).unwrap();

        (executor, plan)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_up_to_the_bound() {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_apply()
            .times(3)
            .returning(|_, _| Err(ProvisionError::Timeout { timeout_secs: 1 }));

        let (executor, plan) = setup(provisioner, &shared(false));
        let mut ledger = Ledger::new();
        let report = executor
            .apply(&plan, &declared(), &mut ledger, &ExecuteOptions::default())
            .await;

        assert_eq!(report.count(OutcomeStatus::Failed), 1);
        assert_eq!(report.outcomes[0].attempts, 3);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("Maximum attempts"));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_apply().times(1).returning(|_, _| {
            Err(ProvisionError::InvalidDeclaration { message: String::from("bad") })
        });

        let (executor, plan) = setup(provisioner, &shared(false));
        let report = executor
            .apply(&plan, &declared(), &mut Ledger::new(), &ExecuteOptions::default())
            .await;

        assert_eq!(report.outcomes[0].status, OutcomeStatus::Failed);
        assert_eq!(report.outcomes[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_unconverged_resource_fails_verification() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_apply().times(1).returning(|_, _| Ok(()));

        let (executor, plan) = setup(provisioner, &shared(false));
        let report = executor
            .apply(&plan, &declared(), &mut Ledger::new(), &ExecuteOptions::default())
            .await;

        assert_eq!(report.outcomes[0].status, OutcomeStatus::Failed);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("did not converge"));
    }

    #[tokio::test]
    async fn test_ledger_prevents_second_provisioner_call() {
        let shared = shared(false);
        let hook = Arc::clone(&shared);

        let mut provisioner = MockProvisioner::new();
        provisioner.expect_apply().times(1).returning(move |targets, mode| {
            assert_eq!(targets, ["web-1"]);
            assert_eq!(mode, ApplyMode::Target);
            hook.lock().unwrap().insert(String::from("web-1"), running("web-1", true));
            Ok(())
        });

        let (executor, plan) = setup(provisioner, &shared);

        let mut ledger = Ledger::new();
        let first = executor
            .apply(&plan, &declared(), &mut ledger, &ExecuteOptions::default())
            .await;
        assert_eq!(first.outcomes[0].status, OutcomeStatus::Applied);
        assert_eq!(first.outcomes[0].attempts, 1);
        assert!(ledger.contains(&plan.actions[0].idempotency_key));

        let second = executor
            .apply(&plan, &declared(), &mut ledger, &ExecuteOptions::default())
            .await;
        assert_eq!(second.outcomes[0].status, OutcomeStatus::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_dry_run_and_cancel_never_call_provisioner() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_apply().never();

        let (executor, plan) = setup(provisioner, &shared(false));

        let dry = ExecuteOptions { dry_run: true, ..ExecuteOptions::default() };
        let report = executor.apply(&plan, &declared(), &mut Ledger::new(), &dry).await;
        assert_eq!(report.outcomes[0].status, OutcomeStatus::DryRun);

        let cancelled = ExecuteOptions::default();
        cancelled.cancel.cancel();
        let report = executor.apply(&plan, &declared(), &mut Ledger::new(), &cancelled).await;
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_ignore_actions_are_skipped() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_apply().never();

        let (executor, _) = setup(provisioner, &shared(true));
        let plan = RemediationPlan {
            created_at: chrono::Utc::now(),
            generation: String::from("g"),
            actions: vec![RemediationAction {
                resource_id: String::from("stray"),
                resource_type: ResourceType::Container,
                address: None,
                kind: ActionKind::Ignore,
                idempotency_key: String::from("k"),
                fields: vec![String::from("presence")],
                reason: String::from("resource is not declared"),
            }],
            manual_only: vec![],
        };

        let report = executor
            .apply(&plan, &declared(), &mut Ledger::new(), &ExecuteOptions::default())
            .await;
        assert_eq!(report.count(OutcomeStatus::Skipped), 1);
    }
}
