// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # driftguard
//!
//! Drift detection and remediation for container infrastructure provisioned
//! by Terraform or a similar tool.
//!
//! ## Overview
//!
//! driftguard compares what the provisioning tool declared with what is
//! actually running, and can put the infrastructure back in line:
//!
//! - Load the last-known-good declared state (manifest or Terraform state)
//! - Inspect live resources in parallel, tolerating partial failure
//! - Produce a deterministic drift report with impact levels
//! - Plan corrective actions under an operator policy
//! - Apply them through the provisioner with retries, then verify
//!
//! ## Architecture
//!
//! Each cycle runs `Inspecting → Diffing → Planning → Executing → Verifying`:
//!
//! 1. **Declared State**: read by a [`declared::StateReader`]
//! 2. **Observed State**: queried through an [`inspect::InfraQuery`]
//! 3. **Drift**: computed by the [`planner::DiffEngine`]
//! 4. **Remediation**: planned and executed via a [`provision::Provisioner`]
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`declared`]: Declared state readers
//! - [`inspect`]: Live infrastructure inspection
//! - [`planner`]: Diff, remediation planning and execution
//! - [`provision`]: Provisioner backends and retry policy
//! - [`state`]: Workspace lock, ledger and report archive
//! - [`engine`]: Cycle state machine and control loop
//! - [`report`]: Cycle reports and exit codes
//! - [`notify`]: Webhook notifications
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: shop
//!   environment: prod
//!
//! state:
//!   source: terraform
//!   path: ./terraform
//!
//! remediation:
//!   policy:
//!     manual_only:
//!       types: [database]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cancel;
pub mod cli;
pub mod command;
pub mod config;
pub mod declared;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod notify;
pub mod planner;
pub mod provision;
pub mod report;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cancel::CancelToken;
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, EngineConfig};
pub use declared::{DeclaredState, ResourceDeclaration, StateReader};
pub use engine::{Engine, EngineParts, EnginePaths};
pub use error::{DriftError, Result};
pub use inspect::{InfraQuery, LiveInspector, ObservedResource};
pub use planner::{DiffEngine, DriftEntry, Executor, RemediationPlan, RemediationPlanner};
pub use provision::{Provisioner, RetryPolicy};
pub use report::{CycleMode, CycleReport, CycleStage};
pub use state::{LocalWorkspace, WorkspaceStore};
