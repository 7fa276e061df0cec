//! Core library for the Ferry CI host driver.
//!
//! Ferry borrows a single ephemeral machine from a pool service, drives it
//! through a bootstrap → test → reboot-verification sequence over SSH, and
//! hands the machine back to the pool however the run ends.

pub mod config;
pub mod engine;
pub mod exec;
pub mod janitor;
mod paths;
pub mod pool;
pub mod probe;
pub mod remote;
pub mod stages;
pub mod test_support;

pub use config::{ConfigError, PoolConfig, ProbeConfig, SshConfig, StageConfig};
pub use engine::{
    EngineError, EngineState, FAILURE_EXIT_CODE, Host, HostState, HostTarget, Orchestrator,
    Outcome, ReleaseStatus, RunReport, RunRequest, Session, VERIFY_ITERATIONS,
};
pub use exec::{CommandOutput, CommandRunner, ExecError, LogSink, ProcessCommandRunner};
pub use janitor::{Janitor, SweepSummary};
pub use pool::{
    DuffyPool, HostLease, InventoryEntry, Pool, PoolError, PoolFuture, PoolRequest, SessionToken,
};
pub use probe::{LivenessProber, ProbeError, ProbeReport};
pub use remote::{ExecutionResult, RemoteError, RemoteExecutor, SSH_CONNECTION_DROPPED};
pub use stages::{Stage, StagePlan};
