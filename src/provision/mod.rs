//! Provisioner interface and backends.
//!
//! The engine never mutates infrastructure directly: every corrective action
//! goes through a [`Provisioner`].

mod command;
mod retry;
mod terraform;

pub use command::{CommandProvisioner, EXIT_DATAERR, EXIT_TEMPFAIL};
pub use retry::RetryPolicy;
pub use terraform::TerraformProvisioner;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProvisionerBackend, ProvisionerConfig};
use crate::error::{ConfigError, ProvisionError};

/// How the provisioner applies a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Apply the declaration to the existing resource.
    Target,
    /// Destroy and recreate the resource.
    Replace,
}

/// Applies declarations to infrastructure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Applies the declarations of the given targets.
    ///
    /// # Errors
    ///
    /// Returns a `ProvisionError`; transient ones may be retried.
    async fn apply(&self, targets: &[String], mode: ApplyMode) -> Result<(), ProvisionError>;
}

impl std::fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Target => "target",
            Self::Replace => "replace",
        };
        write!(f, "{s}")
    }
}

/// Builds the provisioner selected by the configuration.
///
/// `working_dir` is the already-resolved working directory.
///
/// # Errors
///
/// Returns a `ConfigError` if the command backend has no program.
pub fn provisioner_from_config(
    config: &ProvisionerConfig,
    working_dir: PathBuf,
) -> Result<Arc<dyn Provisioner>, ConfigError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.backend {
        ProvisionerBackend::Terraform => Ok(Arc::new(TerraformProvisioner::new(
            config.terraform_bin.clone(),
            working_dir,
            timeout,
        ))),
        ProvisionerBackend::Command => {
            let program = config.program.clone().ok_or_else(|| {
                ConfigError::validation(
                    "command provisioner requires a program",
                    "remediation.provisioner.program",
                )
            })?;
            Ok(Arc::new(
                CommandProvisioner::new(program, config.args.clone(), timeout)
                    .with_working_dir(working_dir),
            ))
        }
    }
}
