//! Reachability polling after a reboot.
//!
//! The prober shells out to `ping` with a single echo request per attempt
//! and stops at the first reply. It is a bounded synchronous loop: there is
//! no cancellation, and exhausting the budget fails the run.

use std::ffi::OsString;

use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, ProbeConfig};
use crate::exec::{CommandRunner, ExecError, LogSink};

/// Successful probe details.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeReport {
    /// Number of pings sent, including the one that was answered.
    pub attempts: u32,
}

/// Errors raised by [`LivenessProber`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// Raised when the host never answered within the attempt budget.
    #[error("host {host} unreachable after {attempts} ping attempts")]
    HostUnreachable {
        /// Host that was probed.
        host: String,
        /// Attempts made.
        attempts: u32,
    },
    /// Raised when `ping` itself could not be launched.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Polls a host with `ping` until it answers.
#[derive(Clone, Debug)]
pub struct LivenessProber<R: CommandRunner> {
    config: ProbeConfig,
    runner: R,
}

impl<R: CommandRunner> LivenessProber<R> {
    /// Creates a prober after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the probe budget is invalid.
    pub fn new(config: ProbeConfig, runner: R) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Pings `host` until it replies or `max_attempts` pings went unanswered.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::HostUnreachable`] when the budget is exhausted
    /// and [`ProbeError::Exec`] when `ping` cannot be started.
    pub fn probe(&self, host: &str, sink: &LogSink) -> Result<ProbeReport, ProbeError> {
        sink.note(&format!("Pinging host {host} ..."));
        let args = self.build_ping_args(host);

        for attempt in 1..=self.config.max_attempts {
            let output = self.runner.run(&self.config.ping_bin, &args, sink)?;
            if output.is_success() {
                sink.note(&format!("Host {host} appears reachable again"));
                return Ok(ProbeReport { attempts: attempt });
            }
            debug!(host, attempt, code = ?output.code, "ping unanswered");
        }

        Err(ProbeError::HostUnreachable {
            host: host.to_owned(),
            attempts: self.config.max_attempts,
        })
    }

    fn build_ping_args(&self, host: &str) -> Vec<OsString> {
        vec![
            OsString::from("-q"),
            OsString::from("-c"),
            OsString::from("1"),
            OsString::from("-W"),
            OsString::from(self.config.attempt_timeout_secs.to_string()),
            OsString::from(host),
        ]
    }
}
