//! Error types for the driftguard engine.
//!
//! This module provides the error hierarchy for every stage of a
//! remediation cycle: configuration, declared state, live inspection,
//! planning, provisioning, execution and notification.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the drift engine.
#[derive(Debug, Error)]
pub enum DriftError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Declared state and workspace errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Live inspection errors.
    #[error("Inspection error: {0}")]
    Inspection(#[from] InspectionError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provisioner errors.
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// Execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Notification errors.
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },
}

/// Declared state and workspace errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The declared state could not be read or parsed.
    #[error("Declared state unavailable from {origin}: {reason}")]
    Unavailable {
        /// Where the state was read from (file, directory, command).
        origin: String,
        /// Why it could not be used.
        reason: String,
    },

    /// A workspace file is corrupted.
    #[error("Workspace file is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A workspace file could not be written.
    #[error("Failed to write workspace file: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire cycle lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The cycle lock is held by another process.
    #[error("Cycle is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Another cycle is already running in this process.
    #[error("A remediation cycle is already running")]
    CycleBusy,

    /// Serialization error.
    #[error("Workspace serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Live inspection errors.
///
/// Per-resource variants are non-fatal: the inspector degrades the resource
/// to `Unknown` and records the error in the cycle report.
#[derive(Debug, Clone, Error)]
pub enum InspectionError {
    /// The infrastructure runtime could not be reached at all.
    #[error("Infrastructure runtime unreachable: {message}")]
    Unreachable {
        /// Description of the failure.
        message: String,
    },

    /// A single resource query failed.
    #[error("Query for {resource} failed: {message}")]
    QueryFailed {
        /// Resource id.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// A single resource query timed out.
    #[error("Query for {resource} timed out after {timeout_secs}s")]
    Timeout {
        /// Resource id.
        resource: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// The runtime returned output that could not be interpreted.
    #[error("Invalid response from infrastructure runtime: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Two actions would target the same resource with contradictory effects.
    #[error("Plan conflict on {resource}: {first} vs {second}")]
    Conflict {
        /// Resource both actions target.
        resource: String,
        /// First action kind.
        first: String,
        /// Contradicting action kind.
        second: String,
    },
}

/// Provisioner errors.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    /// The provisioner call exceeded its timeout.
    #[error("Provisioner timed out after {timeout_secs}s")]
    Timeout {
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// The provisioner's state backend is locked by someone else.
    #[error("Provisioner state is locked: {message}")]
    LockContention {
        /// Lock message reported by the provisioner.
        message: String,
    },

    /// The provisioner reported a transient failure.
    #[error("Transient provisioner failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// The declaration cannot be applied as written.
    #[error("Invalid declaration: {message}")]
    InvalidDeclaration {
        /// Description of the problem.
        message: String,
    },

    /// The provisioner exited unsuccessfully.
    #[error("Provisioner failed (exit code {status:?}): {message}")]
    CommandFailed {
        /// Exit status, if the process exited normally.
        status: Option<i32>,
        /// Trimmed stderr output.
        message: String,
    },

    /// The provisioner could not be started.
    #[error("Failed to start {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// OS error message.
        message: String,
    },
}

/// Per-action execution errors.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The action failed with a non-transient error.
    #[error("Failed to remediate {resource}: {message}")]
    Failed {
        /// Target resource id.
        resource: String,
        /// Failure description.
        message: String,
    },

    /// Transient failures persisted through every attempt.
    #[error("Maximum attempts ({attempts}) exceeded for {resource}: {message}")]
    RetriesExhausted {
        /// Target resource id.
        resource: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure description.
        message: String,
    },

    /// The action applied but the resource did not converge.
    #[error("{resource} did not converge after apply ({remaining} drift entries remain)")]
    VerificationFailed {
        /// Target resource id.
        resource: String,
        /// Drift entries still present after re-inspection.
        remaining: usize,
    },
}

/// Webhook notification errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request could not be sent.
    #[error("Webhook request failed: {message}")]
    Request {
        /// Description of the failure.
        message: String,
    },

    /// The webhook answered with a non-success status.
    #[error("Webhook returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

/// External command errors shared by the command-backed adapters.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("Failed to start {program}: {message}")]
    Spawn {
        /// Program name.
        program: String,
        /// OS error message.
        message: String,
    },

    /// The program did not finish in time.
    #[error("{program} timed out after {timeout_secs}s")]
    Timeout {
        /// Program name.
        program: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },
}

/// Result type alias for driftguard operations.
pub type Result<T> = std::result::Result<T, DriftError>;

impl DriftError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the next attempt may succeed without intervention.
    ///
    /// The watch loop logs such failures as warnings and carries on.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provision(e) => e.is_transient(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates an unavailable-state error.
    #[must_use]
    pub fn unavailable(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl InspectionError {
    /// Creates a per-resource query error.
    #[must_use]
    pub fn query(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryFailed {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Returns the resource this error concerns, if it is resource-scoped.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::QueryFailed { resource, .. } | Self::Timeout { resource, .. } => {
                Some(resource.as_str())
            }
            Self::Unreachable { .. } | Self::InvalidResponse { .. } => None,
        }
    }
}

impl ProvisionError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::LockContention { .. } | Self::Transient { .. }
        )
    }
}

impl ExecutionError {
    /// Returns the resource this error concerns.
    #[must_use]
    pub fn resource(&self) -> &str {
        match self {
            Self::Failed { resource, .. }
            | Self::RetriesExhausted { resource, .. }
            | Self::VerificationFailed { resource, .. } => resource,
        }
    }
}
