//! Local process execution with output streamed into the run log.
//!
//! Every command Ferry launches (`ssh`, `ping`) goes through a
//! [`CommandRunner`] so tests can script exit codes without spawning
//! processes. Child stdout and stderr are not captured in memory: they share
//! the log sink's file descriptor so the log keeps them interleaved in the
//! order the remote side produced them.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

mod log_sink;

pub use log_sink::{LOG_SEPARATOR, LogSink};

/// Result of running an external command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available. `None` means the
    /// process was terminated by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised while launching a local command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the log sink cannot be attached to the child process.
    #[error("failed to attach log sink to {program}: {message}")]
    Sink {
        /// Command that was about to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, streaming its output into
    /// `sink`, and blocks until it exits.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the command cannot be started and
    /// [`ExecError::Sink`] when the log file cannot be handed to the child.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        sink: &LogSink,
    ) -> Result<CommandOutput, ExecError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        sink: &LogSink,
    ) -> Result<CommandOutput, ExecError> {
        debug!(
            program,
            args = %render_args(args),
            "executing command"
        );

        let (stdout, stderr) = sink.child_stdio().map_err(|err| ExecError::Sink {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        let status = Command::new(program)
            .args(args)
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|err| ExecError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: status.code(),
        })
    }
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| format!("'{}'", arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}
