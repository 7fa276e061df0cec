//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::exec::{CommandOutput, CommandRunner, ExecError, LogSink};
use crate::pool::{HostLease, InventoryEntry, Pool, PoolFuture, PoolRequest, SessionToken};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same queue, so an executor and a prober built from
/// clones consume responses in the order the engine issues commands.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the last argument, which for `ssh` is the remote command.
    #[must_use]
    pub fn last_arg(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Number of responses not consumed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.responses.borrow().len()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_exit_code(0);
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code));
    }

    /// Pushes a response with no exit code to simulate a signalled process.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None);
    }

    /// Pushes an explicit exit status.
    pub fn push_output(&self, code: Option<i32>) {
        self.responses
            .borrow_mut()
            .push_back(CommandOutput { code });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        _sink: &LogSink,
    ) -> Result<CommandOutput, ExecError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Errors produced by [`ScriptedPool`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedPoolError {
    /// Acquire was scripted to fail.
    #[error("acquire failure")]
    Acquire,
    /// Release was scripted to fail.
    #[error("release failure")]
    Release,
}

#[derive(Debug, Default)]
struct PoolState {
    lease: Option<HostLease>,
    inventory: Vec<InventoryEntry>,
    fail_on_acquire: bool,
    fail_on_release: bool,
    acquire_calls: u32,
    release_calls: Vec<SessionToken>,
}

/// In-memory pool that lends a fixed host and records every call.
#[derive(Clone, Debug, Default)]
pub struct ScriptedPool {
    state: Arc<Mutex<PoolState>>,
}

impl ScriptedPool {
    /// Creates a pool lending `hostname` under `token`.
    #[must_use]
    pub fn with_lease(hostname: &str, token: &str) -> Self {
        let pool = Self::default();
        pool.state().lease = Some(HostLease {
            hostname: hostname.to_owned(),
            token: SessionToken::new(token),
        });
        pool
    }

    /// Creates a pool whose inventory lists `(hostname, token)` pairs.
    #[must_use]
    pub fn with_inventory(entries: &[(&str, &str)]) -> Self {
        let pool = Self::default();
        pool.state().inventory = entries
            .iter()
            .map(|(hostname, token)| InventoryEntry {
                hostname: (*hostname).to_owned(),
                token: SessionToken::new(*token),
            })
            .collect();
        pool
    }

    /// Makes every acquire call fail.
    pub fn fail_on_acquire(&self) {
        self.state().fail_on_acquire = true;
    }

    /// Makes every release call fail.
    pub fn fail_on_release(&self) {
        self.state().fail_on_release = true;
    }

    /// Number of acquire calls made.
    #[must_use]
    pub fn acquire_calls(&self) -> u32 {
        self.state().acquire_calls
    }

    /// Tokens passed to release, in call order, including failed calls.
    #[must_use]
    pub fn release_calls(&self) -> Vec<SessionToken> {
        self.state().release_calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Pool for ScriptedPool {
    type Error = ScriptedPoolError;

    fn acquire<'a>(
        &'a self,
        _request: &'a PoolRequest,
    ) -> PoolFuture<'a, HostLease, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.acquire_calls += 1;
            if state.fail_on_acquire {
                return Err(ScriptedPoolError::Acquire);
            }
            state.lease.clone().ok_or(ScriptedPoolError::Acquire)
        })
    }

    fn release<'a>(&'a self, token: &'a SessionToken) -> PoolFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.release_calls.push(token.clone());
            if state.fail_on_release {
                return Err(ScriptedPoolError::Release);
            }
            Ok(())
        })
    }

    fn list_active(&self) -> PoolFuture<'_, Vec<InventoryEntry>, Self::Error> {
        Box::pin(async move { Ok(self.state().inventory.clone()) })
    }
}

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Holds process-wide environment overrides for the lifetime of the guard.
///
/// Guards serialise on a global lock, so tests that load configuration from
/// the environment do not observe each other's variables.
#[derive(Debug)]
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `pairs` and removes every variable in `cleared`.
    #[must_use]
    pub fn set_vars(pairs: &[(&str, &str)], cleared: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = Vec::with_capacity(pairs.len() + cleared.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
        }
        for key in cleared {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

/// Environment variables read by the configuration loaders.
pub const CONFIG_ENV_VARS: &[&str] = &[
    "FERRY_POOL_API_URL",
    "FERRY_POOL_API_KEY",
    "FERRY_POOL_KEY_FILE",
    "FERRY_SSH_BIN",
    "FERRY_SSH_USER",
    "FERRY_SSH_CONNECT_TIMEOUT_SECS",
    "FERRY_SSH_KNOWN_HOSTS_FILE",
    "FERRY_SSH_DISABLE_TTY",
    "FERRY_PROBE_PING_BIN",
    "FERRY_PROBE_MAX_ATTEMPTS",
    "FERRY_PROBE_ATTEMPT_TIMEOUT_SECS",
    "FERRY_PROBE_SETTLE_BEFORE_SECS",
    "FERRY_PROBE_SETTLE_AFTER_SECS",
    "FERRY_STAGES_REPO_BASE_URL",
    "FERRY_STAGES_REPO_NAME",
];

impl EnvGuard {
    /// Points configuration discovery at `dir/ferry.toml` holding `contents`,
    /// with `HOME` and the XDG config directory moved to `dir` and every
    /// `FERRY_*` override cleared.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be written or `dir` is not UTF-8.
    #[must_use]
    pub fn config_file(dir: &Path, contents: &str) -> Self {
        let config_path = dir.join("ferry.toml");
        std::fs::write(&config_path, contents).unwrap_or_else(|err| {
            panic!("failed to write {}: {err}", config_path.display())
        });
        let dir = dir.to_str().unwrap_or_else(|| panic!("non UTF-8 dir"));
        let config_path = config_path
            .to_str()
            .unwrap_or_else(|| panic!("non UTF-8 config path"));
        Self::set_vars(
            &[
                ("HOME", dir),
                ("XDG_CONFIG_HOME", dir),
                ("FERRY_CONFIG_PATH", config_path),
            ],
            CONFIG_ENV_VARS,
        )
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
