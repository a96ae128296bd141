//! Drift planning and remediation.
//!
//! This module compares declared and observed state, turns the resulting
//! drift into a remediation plan under the operator policy, and executes
//! that plan through a provisioner.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffEngine, DriftEntry, DriftKind, Impact, PRESENCE_FIELD};
pub use executor::{ActionOutcome, ExecuteOptions, ExecutionReport, Executor, OutcomeStatus};
pub use plan::{ActionKind, RemediationAction, RemediationPlan, RemediationPlanner};
