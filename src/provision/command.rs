//! Command-backed provisioner.
//!
//! Invokes `program <args...> <mode> <targets...>`. Exit code 75
//! (`EX_TEMPFAIL`) is transient and 65 (`EX_DATAERR`) marks an invalid
//! declaration; any other non-zero exit is a plain failure.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::{ApplyMode, Provisioner};
use crate::command::{self, CommandOutput};
use crate::error::{CommandError, ProvisionError};

/// Exit code for a temporary failure.
pub const EXIT_TEMPFAIL: i32 = 75;

/// Exit code for invalid input data.
pub const EXIT_DATAERR: i32 = 65;

/// Provisioner that runs an arbitrary program.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandProvisioner {
    /// Creates a command provisioner.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            timeout,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Maps a finished run to a provisioner result.
    ///
    /// # Errors
    ///
    /// Returns the classified `ProvisionError` for a non-zero exit.
    pub fn classify(output: &CommandOutput) -> Result<(), ProvisionError> {
        match output.status {
            Some(0) => Ok(()),
            Some(EXIT_TEMPFAIL) => Err(ProvisionError::Transient {
                message: output.message(),
            }),
            Some(EXIT_DATAERR) => Err(ProvisionError::InvalidDeclaration {
                message: output.message(),
            }),
            status => Err(ProvisionError::CommandFailed {
                status,
                message: output.message(),
            }),
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn apply(&self, targets: &[String], mode: ApplyMode) -> Result<(), ProvisionError> {
        let mut args = self.args.clone();
        args.push(mode.to_string());
        args.extend(targets.iter().cloned());

        info!("{} ({}) for {}", self.program, mode, targets.join(", "));

        let output = command::run(&self.program, &args, self.working_dir.as_deref(), self.timeout)
            .await
            .map_err(|e| match e {
                CommandError::Timeout { timeout_secs, .. } => {
                    ProvisionError::Timeout { timeout_secs }
                }
                CommandError::Spawn { program, message } => {
                    ProvisionError::Spawn { program, message }
                }
            })?;

        Self::classify(&output)
    }
}
