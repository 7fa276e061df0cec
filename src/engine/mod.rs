//! Orchestrates a CI run on one borrowed host.
//!
//! The engine acquires a host, runs the bootstrap stage, the test suites,
//! and a fixed number of reboot-verification rounds, rebooting and
//! re-probing the host between them. The first stage whose exit code
//! differs from its expectation ends the run; nothing is retried. Once the
//! stage sequence has stopped, for whatever reason, the host is released
//! unless the caller asked to keep it.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::exec::{CommandRunner, LogSink};
use crate::pool::{Pool, PoolRequest};
use crate::probe::{LivenessProber, ProbeError};
use crate::remote::{ExecutionResult, RemoteError, RemoteExecutor};
use crate::stages::{Stage, StagePlan};

mod session;

pub use session::{EngineState, Host, HostState, Outcome, Session};

/// Number of post-test reboot-verification rounds.
pub const VERIFY_ITERATIONS: u8 = 4;

/// Process exit status reported for any failed run.
pub const FAILURE_EXIT_CODE: i32 = 255;

/// Where the run host comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostTarget {
    /// Borrow a host from the pool.
    Acquire(PoolRequest),
    /// Use an already provisioned host.
    Supplied(String),
}

/// Inputs of a single run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunRequest {
    /// Host source.
    pub target: HostTarget,
    /// Keep the host instead of releasing it at the end.
    pub keep: bool,
}

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum EngineError<PoolError>
where
    PoolError: std::error::Error + 'static,
{
    /// Raised when the pool does not lend a host.
    #[error("failed to acquire host: {0}")]
    Acquire(#[source] PoolError),
    /// Raised when a stage exits with an unexpected code or cannot start.
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// Underlying executor error.
        #[source]
        source: RemoteError,
    },
    /// Raised when the host does not answer after a reboot.
    #[error("host did not come back from reboot {reboot}: {source}")]
    Probe {
        /// Ordinal of the reboot that was being verified.
        reboot: u32,
        /// Underlying probe error.
        #[source]
        source: ProbeError,
    },
    /// Raised when the host's own boot counter disagrees with the number of
    /// reboots the engine performed.
    #[error("boot counter mismatch: host reports {}, engine counted {expected} reboots", render_boots(*.actual))]
    Consistency {
        /// Reboots tracked by the engine.
        expected: u32,
        /// Boot count reported by the host.
        actual: Option<i32>,
    },
    /// Raised when returning the host fails after an otherwise successful run.
    #[error("failed to release host: {0}")]
    Release(#[source] PoolError),
}

fn render_boots(actual: Option<i32>) -> String {
    actual.map_or_else(
        || String::from("no boot count"),
        |count| format!("{count} boots"),
    )
}

/// What happened to the host at the end of the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReleaseStatus {
    /// The host was never borrowed, so there was nothing to release.
    NotLeased,
    /// The host was kept on request.
    Retained,
    /// The host was returned to the pool.
    Released,
    /// The release call failed.
    Failed {
        /// Error reported by the pool.
        message: String,
    },
}

/// Summary of a finished run.
#[derive(Debug)]
pub struct RunReport<PoolError>
where
    PoolError: std::error::Error + 'static,
{
    /// Final verdict.
    pub outcome: Outcome,
    /// State in which the stage sequence stopped, when it stopped early.
    pub failed_in: Option<EngineState>,
    /// Reboots completed.
    pub reboot_count: u32,
    /// Wall-clock duration of the whole run.
    pub elapsed: Duration,
    /// What happened to the host.
    pub release: ReleaseStatus,
    /// Error that decided a failed outcome.
    pub failure: Option<EngineError<PoolError>>,
}

impl<PoolError> RunReport<PoolError>
where
    PoolError: std::error::Error + 'static,
{
    /// Process exit status for this run: 0 on success, 255 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::Success => 0,
            Outcome::Pending | Outcome::Failed => FAILURE_EXIT_CODE,
        }
    }
}

/// Drives one run through its stages.
#[derive(Debug)]
pub struct Orchestrator<P, R: CommandRunner> {
    pool: P,
    executor: RemoteExecutor<R>,
    prober: LivenessProber<R>,
    plan: StagePlan,
}

impl<P, R> Orchestrator<P, R>
where
    P: Pool,
    R: CommandRunner,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(
        pool: P,
        executor: RemoteExecutor<R>,
        prober: LivenessProber<R>,
        plan: StagePlan,
    ) -> Self {
        Self {
            pool,
            executor,
            prober,
            plan,
        }
    }

    /// Returns the pool client.
    #[must_use]
    pub const fn pool(&self) -> &P {
        &self.pool
    }

    /// Runs the whole sequence and reports the outcome.
    ///
    /// Errors are not returned but recorded in the report; the host is
    /// released exactly once whichever way the run ends, unless
    /// `request.keep` is set or the host was supplied by the caller.
    pub async fn run(&self, request: &RunRequest, sink: &LogSink) -> RunReport<P::Error> {
        let started = Instant::now();

        let host = match self.provision(&request.target).await {
            Ok(host) => host,
            Err(err) => {
                sink.note(&format!("Execution failed! {err}"));
                let elapsed = started.elapsed();
                note_total_time(sink, elapsed);
                return RunReport {
                    outcome: Outcome::Failed,
                    failed_in: Some(EngineState::Provisioning),
                    reboot_count: 0,
                    elapsed,
                    release: ReleaseStatus::NotLeased,
                    failure: Some(err),
                };
            }
        };

        let mut session = Session::new(host, sink, request.keep);
        let result = self.drive(&mut session).await;
        self.conclude(session, result, started).await
    }

    async fn provision(&self, target: &HostTarget) -> Result<Host, EngineError<P::Error>> {
        match target {
            HostTarget::Supplied(hostname) => {
                info!(%hostname, "using pre-provisioned host");
                Ok(Host::supplied(hostname.as_str()))
            }
            HostTarget::Acquire(request) => {
                let lease = self
                    .pool
                    .acquire(request)
                    .await
                    .map_err(EngineError::Acquire)?;
                Ok(Host::leased(lease))
            }
        }
    }

    async fn drive(&self, session: &mut Session<'_>) -> Result<(), EngineError<P::Error>> {
        session.enter(EngineState::Bootstrapping);
        self.run_stage(session, &self.plan.bootstrap)?;
        self.reboot_cycle(session).await?;

        session.enter(EngineState::Testing);
        for stage in &self.plan.test_suites {
            self.run_stage(session, stage)?;
            self.reboot_cycle(session).await?;
        }

        for iteration in 0..VERIFY_ITERATIONS {
            session.enter(EngineState::VerifyLoop(iteration));
            self.check_boot_count(session)?;
            self.reboot_cycle(session).await?;
            self.run_stage(session, &self.plan.failed_units)?;
        }

        Ok(())
    }

    fn run_stage(
        &self,
        session: &Session<'_>,
        stage: &Stage,
    ) -> Result<ExecutionResult, EngineError<P::Error>> {
        debug!(stage = %stage.name, state = ?session.state(), "running stage");
        self.executor
            .execute(
                session.host().hostname(),
                &stage.command,
                stage.expected_exit_code,
                session.sink(),
            )
            .map_err(|source| EngineError::Stage {
                stage: stage.name.clone(),
                source,
            })
    }

    /// Compares the host's boot counter with the engine's reboot count. The
    /// host cannot tell an unrequested reboot apart, so one shows up here as
    /// a plain mismatch.
    fn check_boot_count(&self, session: &Session<'_>) -> Result<(), EngineError<P::Error>> {
        let expected = session.reboot_count();
        let stage = StagePlan::boot_count_check(expected);
        match self.run_stage(session, &stage) {
            Ok(_) => Ok(()),
            Err(EngineError::Stage {
                source: RemoteError::CommandFailed { actual, .. },
                ..
            }) => Err(EngineError::Consistency { expected, actual }),
            Err(err) => Err(err),
        }
    }

    async fn reboot_cycle(&self, session: &mut Session<'_>) -> Result<(), EngineError<P::Error>> {
        let reboot = session.reboot_count().saturating_add(1);
        self.run_stage(session, &self.plan.reboot)?;

        sleep(self.prober.config().settle_before()).await;
        self.prober
            .probe(session.host().hostname(), session.sink())
            .map_err(|source| EngineError::Probe { reboot, source })?;
        sleep(self.prober.config().settle_after()).await;

        let count = session.record_reboot();
        debug!(reboot_count = count, "reboot verified");
        Ok(())
    }

    async fn conclude(
        &self,
        mut session: Session<'_>,
        result: Result<(), EngineError<P::Error>>,
        started: Instant,
    ) -> RunReport<P::Error> {
        let sink = session.sink();
        let (mut outcome, failed_in, mut failure) = match result {
            Ok(()) => {
                sink.note("All tests succeeded.");
                (Outcome::Success, None, None)
            }
            Err(err) => {
                sink.note(&format!(
                    "Execution failed! See logfile for details: {err}"
                ));
                (Outcome::Failed, Some(session.state()), Some(err))
            }
        };
        session.finish(outcome);

        let release = match self.release(&mut session).await {
            Ok(status) => status,
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "failed to release host");
                sink.note(&format!("Failed to release host: {message}"));
                if failure.is_none() {
                    outcome = Outcome::Failed;
                    failure = Some(EngineError::Release(err));
                    session.finish(outcome);
                }
                ReleaseStatus::Failed { message }
            }
        };

        let elapsed = started.elapsed();
        note_total_time(sink, elapsed);

        RunReport {
            outcome,
            failed_in,
            reboot_count: session.reboot_count(),
            elapsed,
            release,
            failure,
        }
    }

    async fn release(&self, session: &mut Session<'_>) -> Result<ReleaseStatus, P::Error> {
        let Some(token) = session.host().token().cloned() else {
            return Ok(ReleaseStatus::NotLeased);
        };

        if session.keep() {
            session.sink().note(&format!(
                "Keeping host {}, token = {token}",
                session.host().hostname()
            ));
            return Ok(ReleaseStatus::Retained);
        }

        self.pool.release(&token).await?;
        session.mark_released();
        Ok(ReleaseStatus::Released)
    }
}

fn note_total_time(sink: &LogSink, elapsed: Duration) {
    sink.note(&format!("Total time {:.1} seconds", elapsed.as_secs_f64()));
}

#[cfg(test)]
mod tests;
