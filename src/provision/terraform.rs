//! Terraform-backed provisioner.
//!
//! Runs `terraform apply -auto-approve -input=false` scoped to the target
//! addresses. Replace mode adds `-replace=` so the resource is destroyed and
//! recreated.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::{ApplyMode, Provisioner};
use crate::command::{self, CommandOutput};
use crate::error::{CommandError, ProvisionError};

/// Output fragments Terraform prints when the state is locked.
const LOCK_MARKERS: &[&str] = &["Error acquiring the state lock", "state lock"];

/// Output fragments indicating the configuration itself is invalid.
const INVALID_MARKERS: &[&str] = &[
    "Error: Invalid",
    "Unsupported argument",
    "Missing required argument",
    "Reference to undeclared",
    "No configuration files",
];

/// Provisioner backed by the Terraform CLI.
#[derive(Debug, Clone)]
pub struct TerraformProvisioner {
    terraform_bin: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl TerraformProvisioner {
    /// Creates a provisioner running in the given working directory.
    #[must_use]
    pub fn new(
        terraform_bin: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            terraform_bin: terraform_bin.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }

    /// Builds the `apply` argument list.
    #[must_use]
    pub fn apply_args(targets: &[String], mode: ApplyMode) -> Vec<String> {
        let mut args = vec![
            String::from("apply"),
            String::from("-auto-approve"),
            String::from("-input=false"),
            String::from("-no-color"),
        ];
        for target in targets {
            if mode == ApplyMode::Replace {
                args.push(format!("-replace={target}"));
            }
            args.push(format!("-target={target}"));
        }
        args
    }

    /// Maps a finished Terraform run to a provisioner result.
    ///
    /// # Errors
    ///
    /// Returns the classified `ProvisionError` for a non-zero exit.
    pub fn classify(output: &CommandOutput) -> Result<(), ProvisionError> {
        if output.success() {
            return Ok(());
        }

        let message = output.message();
        if LOCK_MARKERS.iter().any(|m| message.contains(m)) {
            return Err(ProvisionError::LockContention { message });
        }
        if INVALID_MARKERS.iter().any(|m| message.contains(m)) {
            return Err(ProvisionError::InvalidDeclaration { message });
        }
        Err(ProvisionError::CommandFailed {
            status: output.status,
            message,
        })
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn apply(&self, targets: &[String], mode: ApplyMode) -> Result<(), ProvisionError> {
        let args = Self::apply_args(targets, mode);
        info!("terraform apply ({}) for {}", mode, targets.join(", "));

        let output = command::run(&self.terraform_bin, &args, Some(&self.working_dir), self.timeout)
            .await
            .map_err(|e| match e {
                CommandError::Timeout { timeout_secs, .. } => {
                    ProvisionError::Timeout { timeout_secs }
                }
                CommandError::Spawn { program, message } => {
                    ProvisionError::Spawn { program, message }
                }
            })?;

        debug!("terraform exited with {:?}", output.status);
        Self::classify(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(status: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_apply_args_target_and_replace() {
        let targets = vec![String::from("docker_container.web[0]")];

        let target = TerraformProvisioner::apply_args(&targets, ApplyMode::Target);
        assert!(target.contains(&String::from("-target=docker_container.web[0]")));
        assert!(!target.iter().any(|a| a.starts_with("-replace=")));

        let replace = TerraformProvisioner::apply_args(&targets, ApplyMode::Replace);
        assert!(replace.contains(&String::from("-replace=docker_container.web[0]")));
        assert!(replace.contains(&String::from("-auto-approve")));
    }

    #[test]
    fn test_classify_lock_contention_is_transient() {
        let locked = output(1, "Error: Error acquiring the state lock");
        let err = TerraformProvisioner::classify(&locked).unwrap_err();
        assert!(matches!(err, ProvisionError::LockContention { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_invalid_configuration() {
        let invalid = output(1, "Error: Unsupported argument");
        let err = TerraformProvisioner::classify(&invalid).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidDeclaration { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_success_and_generic_failure() {
        assert!(TerraformProvisioner::classify(&output(0, "")).is_ok());
        let err = TerraformProvisioner::classify(&output(1, "boom")).unwrap_err();
        assert!(matches!(err, ProvisionError::CommandFailed { status: Some(1), .. }));
    }
}
