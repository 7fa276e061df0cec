//! Mutable state of a single run.

use tracing::debug;

use crate::exec::LogSink;
use crate::pool::{HostLease, SessionToken};

/// Lifecycle of the host bound to a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostState {
    /// Supplied on the command line rather than borrowed from the pool, and
    /// no command has run yet. Such a host moves to `InUse` like a leased one
    /// but never reaches `Released`.
    Unallocated,
    /// Borrowed from the pool; no command has run yet.
    Acquired,
    /// Stages are running on the host.
    InUse,
    /// Returned to the pool.
    Released,
}

/// Host a session runs on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Host {
    hostname: String,
    token: Option<SessionToken>,
    state: HostState,
}

impl Host {
    /// Wraps a host borrowed from the pool.
    #[must_use]
    pub fn leased(lease: HostLease) -> Self {
        Self {
            hostname: lease.hostname,
            token: Some(lease.token),
            state: HostState::Acquired,
        }
    }

    /// Wraps a host provisioned outside Ferry. Such a host has no session
    /// token and is never released.
    #[must_use]
    pub fn supplied(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            token: None,
            state: HostState::Unallocated,
        }
    }

    /// Hostname used for SSH and ping.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Token needed to release the host, if it was borrowed.
    #[must_use]
    pub const fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> HostState {
        self.state
    }
}

/// Final verdict of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The run has not finished.
    Pending,
    /// Every stage returned its expected exit code.
    Success,
    /// A stage failed, or the host could not be acquired or released.
    Failed,
}

/// Position of the engine in the run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineState {
    /// Acquiring the host.
    Provisioning,
    /// Installing the CI repository and running its bootstrap script.
    Bootstrapping,
    /// Running the test suites.
    Testing,
    /// Post-test reboot verification; holds the zero-based iteration.
    VerifyLoop(u8),
    /// Finished.
    Done(Outcome),
}

/// The run in progress: bound host, reboot bookkeeping, and log sink.
///
/// Only the engine advances a session.
#[derive(Debug)]
pub struct Session<'a> {
    host: Host,
    reboot_count: u32,
    sink: &'a LogSink,
    outcome: Outcome,
    keep: bool,
    state: EngineState,
}

impl<'a> Session<'a> {
    pub(crate) const fn new(host: Host, sink: &'a LogSink, keep: bool) -> Self {
        Self {
            host,
            reboot_count: 0,
            sink,
            outcome: Outcome::Pending,
            keep,
            state: EngineState::Provisioning,
        }
    }

    /// Host bound to this session.
    #[must_use]
    pub const fn host(&self) -> &Host {
        &self.host
    }

    /// Reboots completed so far.
    #[must_use]
    pub const fn reboot_count(&self) -> u32 {
        self.reboot_count
    }

    /// Sink receiving banners and command output.
    #[must_use]
    pub const fn sink(&self) -> &'a LogSink {
        self.sink
    }

    /// Current verdict.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Whether the host should be kept instead of released.
    #[must_use]
    pub const fn keep(&self) -> bool {
        self.keep
    }

    /// Current engine state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    pub(crate) fn enter(&mut self, state: EngineState) {
        debug!(from = ?self.state, to = ?state, host = %self.host.hostname, "engine transition");
        if matches!(self.host.state, HostState::Acquired | HostState::Unallocated) {
            self.host.state = HostState::InUse;
        }
        self.state = state;
    }

    pub(crate) fn record_reboot(&mut self) -> u32 {
        self.reboot_count = self.reboot_count.saturating_add(1);
        self.reboot_count
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        self.outcome = outcome;
        self.state = EngineState::Done(outcome);
    }

    pub(crate) fn mark_released(&mut self) {
        self.host.state = HostState::Released;
    }
}
