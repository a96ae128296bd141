//! External command execution with per-call timeouts.
//!
//! Used by the Terraform state reader, the Docker inspector and the
//! provisioners. A call either returns the process output (whatever the
//! exit status) or a [`CommandError`] when the program could not be started
//! or did not finish in time.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally.
    pub status: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the process exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    #[must_use]
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs `program args...` and waits at most `timeout` for it to finish.
///
/// The child is killed if the timeout elapses.
///
/// # Errors
///
/// Returns `CommandError::Spawn` if the program cannot be started and
/// `CommandError::Timeout` if it does not finish in time.
pub async fn run<S: AsRef<str>>(
    program: &str,
    args: &[S],
    working_dir: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let mut command = Command::new(program);
    command
        .args(args.iter().map(AsRef::<str>::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    debug!(
        "Running {} {}",
        program,
        args.iter().map(AsRef::<str>::as_ref).collect::<Vec<&str>>().join(" ")
    );

    let child = command.spawn().map_err(|e| CommandError::Spawn {
        program: program.to_string(),
        message: e.to_string(),
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(CommandError::Spawn {
            program: program.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(CommandError::Timeout {
            program: program.to_string(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}
