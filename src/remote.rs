//! Remote command execution over the system `ssh` client.
//!
//! Every command is bracketed by timestamped banners in the log sink and
//! checked against an expected exit code supplied by the caller.

use std::ffi::OsString;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::{ConfigError, SshConfig};
use crate::exec::{CommandRunner, ExecError, LogSink};

/// Exit status `ssh` reports when the remote side closes the connection
/// before the command returns, which is what a successful `reboot` does.
pub const SSH_CONNECTION_DROPPED: i32 = 255;

const BANNER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of a remote command whose exit code matched expectations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionResult {
    /// Exit code observed.
    pub exit_code: i32,
    /// Wall-clock time spent in `ssh`.
    pub duration: Duration,
    /// Log file holding the command output, when output is not on the
    /// terminal.
    pub output: Option<Utf8PathBuf>,
}

/// Errors raised by [`RemoteExecutor`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the remote exit code differs from the expected one.
    #[error("remote command '{command}' on {host} returned {}, expected {expected}", render_code(*.actual))]
    CommandFailed {
        /// Host the command ran on.
        host: String,
        /// Command as sent to the host.
        command: String,
        /// Observed exit code; `None` when `ssh` was killed by a signal.
        actual: Option<i32>,
        /// Exit code the caller required.
        expected: i32,
    },
    /// Raised when `ssh` could not be launched.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

fn render_code(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("no exit code"), |value| value.to_string())
}

/// Runs commands on a remote host through `ssh`.
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates an executor after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the SSH settings are incomplete.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Executes `command` on `host` and checks its exit code.
    ///
    /// `expected_exit_code` is normally zero. Callers pass a different value
    /// for commands that cannot exit cleanly, such as a reboot that severs
    /// the connection.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::CommandFailed`] on an exit code mismatch and
    /// [`RemoteError::Exec`] when `ssh` cannot be started.
    pub fn execute(
        &self,
        host: &str,
        command: &str,
        expected_exit_code: i32,
        sink: &LogSink,
    ) -> Result<ExecutionResult, RemoteError> {
        sink.note(&format!(
            ">>> [{}] Executing remote command: '{command}' on {host}",
            timestamp()
        ));

        let args = self.build_ssh_args(host, command);
        let started = Instant::now();
        let output = self.runner.run(&self.config.bin, &args, sink)?;
        let duration = started.elapsed();

        sink.note(&format!(
            "<<< [{}] Remote command finished after {:.1} seconds, return code = {}",
            timestamp(),
            duration.as_secs_f64(),
            render_code(output.code)
        ));

        match output.code {
            Some(code) if code == expected_exit_code => Ok(ExecutionResult {
                exit_code: code,
                duration,
                output: sink.path().map(camino::Utf8Path::to_path_buf),
            }),
            actual => Err(RemoteError::CommandFailed {
                host: host.to_owned(),
                command: command.to_owned(),
                actual,
                expected: expected_exit_code,
            }),
        }
    }

    pub(crate) fn build_ssh_args(&self, host: &str, command: &str) -> Vec<OsString> {
        let mut args = Vec::new();

        if !self.config.disable_tty {
            // A single -t is ignored when ferry itself has no terminal.
            args.push(OsString::from("-tt"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from("StrictHostKeyChecking=no"));
        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));
        args.push(OsString::from("-l"));
        args.push(OsString::from(&self.config.user));
        args.push(OsString::from(host));
        args.push(OsString::from(command));
        args
    }
}

fn timestamp() -> String {
    chrono::Local::now()
        .format(BANNER_TIMESTAMP_FORMAT)
        .to_string()
}
