//! Runs approved commands.

use std::process::Command;

use crate::error::{Error, Result};
use crate::observability::EXECUTION_FAILURES;

/// Something that can run an approved command.
pub trait Executor: Send {
    /// Runs `command` to completion.
    fn run(&mut self, command: &str) -> Result<()>;
}

/// Runs commands through `sh -c` with the operator's terminal attached.
///
/// Output is not captured and there is no timeout.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    /// Creates an executor that uses `sh`.
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    /// Creates an executor that uses the given shell binary.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ShellExecutor {
    fn run(&mut self, command: &str) -> Result<()> {
        tracing::info!(shell = %self.shell, %command, "executing command");
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .status()
            .map_err(|err| {
                EXECUTION_FAILURES.click();
                Error::execution_failed(format!("could not start {}", self.shell), None, Some(err))
            })?;
        if status.success() {
            Ok(())
        } else {
            EXECUTION_FAILURES.click();
            tracing::warn!(%command, ?status, "command exited unsuccessfully");
            Err(Error::execution_failed(command, status.code(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command() {
        ShellExecutor::new().run("true").unwrap();
    }

    #[test]
    fn exit_status_is_reported() {
        let err = ShellExecutor::new().run("exit 3").unwrap_err();
        match err {
            Error::ExecutionFailed { exit_code, .. } => assert_eq!(exit_code, Some(3)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_shell_keeps_io_source() {
        let err = ShellExecutor::with_shell("/nonexistent/shell")
            .run("true")
            .unwrap_err();
        assert!(std::error::Error::source(&err).is_some());
    }
}
