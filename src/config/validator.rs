//! Configuration validation.
//!
//! Field-level limits come from the `validator` derive rules on the spec
//! types; this module adds the cross-field checks and collects everything
//! into one [`ValidationResult`].

use crate::error::{ConfigError, DriftError, Result};
use std::collections::HashSet;
use tracing::debug;
use validator::Validate;

use super::spec::{
    EngineConfig, InspectorBackend, ProvisionerBackend, RemediationConfig, StateSource,
};
use crate::planner::ActionKind;

/// Validator for engine configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(DriftError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    /// Runs every check and returns the collected result without failing.
    #[must_use]
    pub fn check(&self, config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::collect_derived(config, &mut result);
        Self::validate_project(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_inspector(config, &mut result);
        Self::validate_tracking(config, &mut result);
        Self::validate_remediation(&config.remediation, &mut result);
        Self::validate_notifications(config, &mut result);

        result
    }

    /// Converts `validator` derive failures into validation errors.
    fn collect_derived(config: &EngineConfig, result: &mut ValidationResult) {
        if let Err(errors) = config.validate() {
            for line in errors.to_string().lines() {
                let (field, message) = line
                    .split_once(": ")
                    .map_or_else(|| ("config", line), |(f, m)| (f, m));
                result.errors.push(ValidationError {
                    field: field.trim().to_string(),
                    message: message.trim().to_string(),
                });
            }
        }
    }

    fn validate_project(config: &EngineConfig, result: &mut ValidationResult) {
        let name = &config.project.name;
        if !name.is_empty() && !is_valid_name(name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{name}' is invalid. Must be lowercase alphanumeric with hyphens."
                ),
            });
        }
    }

    fn validate_state(config: &EngineConfig, result: &mut ValidationResult) {
        if config.state.source == StateSource::Terraform && config.state.terraform_bin.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("state.terraform_bin"),
                message: String::from("Terraform binary cannot be empty"),
            });
        }
    }

    fn validate_inspector(config: &EngineConfig, result: &mut ValidationResult) {
        let inspector = &config.inspector;
        match inspector.backend {
            InspectorBackend::Snapshot => {
                if inspector.snapshot_path.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("inspector.snapshot_path"),
                        message: String::from("Snapshot path is required for the snapshot backend"),
                    });
                }
            }
            InspectorBackend::Docker => {
                if inspector.docker_bin.is_empty() {
                    result.errors.push(ValidationError {
                        field: String::from("inspector.docker_bin"),
                        message: String::from("Docker binary cannot be empty"),
                    });
                }
            }
        }

        if !inspector.include_networks && !inspector.include_volumes {
            debug!("Networks and volumes excluded from inspection");
        }
    }

    fn validate_tracking(config: &EngineConfig, result: &mut ValidationResult) {
        let fields = &config.tracking.fields;
        if fields.is_empty() {
            result.warnings.push(String::from(
                "tracking.fields: No fields tracked, drift is limited to presence",
            ));
        }

        let mut seen = HashSet::new();
        for (i, field) in fields.iter().enumerate() {
            if !seen.insert(field) {
                result.warnings.push(format!("tracking.fields[{i}]: Duplicate field '{field}'"));
            }
        }
    }

    fn validate_remediation(remediation: &RemediationConfig, result: &mut ValidationResult) {
        let provisioner = &remediation.provisioner;
        if provisioner.backend == ProvisionerBackend::Command
            && provisioner.program.as_ref().is_none_or(String::is_empty)
        {
            result.errors.push(ValidationError {
                field: String::from("remediation.provisioner.program"),
                message: String::from("Program is required for the command provisioner"),
            });
        }

        let retry = &remediation.retry;
        if retry.base_delay_ms > retry.max_delay_ms {
            result.errors.push(ValidationError {
                field: String::from("remediation.retry.base_delay_ms"),
                message: format!(
                    "Base delay ({}ms) exceeds max delay ({}ms)",
                    retry.base_delay_ms, retry.max_delay_ms
                ),
            });
        }

        let policy = &remediation.policy;
        if policy.on_extra != ActionKind::Ignore {
            result.warnings.push(format!(
                "remediation.policy.on_extra: '{}' for unmanaged resources \
                 hands them to the provisioner",
                policy.on_extra
            ));
        }

        for id in &policy.manual_only.ids {
            if policy.auto_remediate.ids.contains(id) {
                result.warnings.push(format!(
                    "remediation.policy: '{id}' is both manual-only and auto-remediated; \
                     manual-only wins"
                ));
            }
        }
    }

    fn validate_notifications(config: &EngineConfig, result: &mut ValidationResult) {
        if let Some(notifications) = &config.notifications {
            let url = notifications.webhook_url.as_str();
            if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
                result.errors.push(ValidationError {
                    field: String::from("notifications.webhook_url"),
                    message: format!("Webhook URL must be http(s): {url}"),
                });
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
