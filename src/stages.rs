//! Remote commands making up a CI run.
//!
//! The scripts themselves live in the CI repository cloned onto the host by
//! the bootstrap stage; this module only renders the command lines.

use shell_escape::unix::escape;

use crate::config::{ConfigError, StageConfig};
use crate::remote::SSH_CONNECTION_DROPPED;

/// A remote command paired with the exit code that counts as success.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stage {
    /// Short label used in logs.
    pub name: String,
    /// Shell command run on the host.
    pub command: String,
    /// Exit code required for the stage to pass.
    pub expected_exit_code: i32,
}

impl Stage {
    /// Creates a stage expecting exit code zero.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            expected_exit_code: 0,
        }
    }

    /// Overrides the expected exit code.
    #[must_use]
    pub const fn expecting(mut self, code: i32) -> Self {
        self.expected_exit_code = code;
        self
    }
}

/// Ordered commands for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagePlan {
    /// Installs git, clones the CI repository, and runs its bootstrap script.
    pub bootstrap: Stage,
    /// Test suites, each followed by a reboot.
    pub test_suites: Vec<Stage>,
    /// Dumps the journal of the current boot, then reboots. The connection
    /// drops before `ssh` can report success.
    pub reboot: Stage,
    /// Passes only when no systemd unit is in the failed state.
    pub failed_units: Stage,
}

impl StagePlan {
    /// Builds the plan for `pull_request` from the repository settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the repository settings are incomplete.
    pub fn new(config: &StageConfig, pull_request: Option<&str>) -> Result<Self, ConfigError> {
        config.validate()?;
        let repo = config.repo_name.trim();
        let repo_url = format!("{}{repo}.git", config.repo_base_url.trim());

        let mut bootstrap =
            format!("yum install -y git && git clone {repo_url} && {repo}/slave/bootstrap.sh");
        if let Some(pr) = pull_request {
            // The pull request id comes from the command line.
            bootstrap.push(' ');
            bootstrap.push_str(escape(pr.into()).as_ref());
        }

        Ok(Self {
            bootstrap: Stage::new("bootstrap", bootstrap),
            test_suites: vec![
                Stage::new("testsuite", format!("{repo}/slave/testsuite.sh")),
                Stage::new(
                    "system-tests",
                    format!("cd {repo}/slave; ./system-tests.sh"),
                ),
            ],
            reboot: Stage::new("reboot", "journalctl --no-pager -b && reboot")
                .expecting(SSH_CONNECTION_DROPPED),
            failed_units: Stage::new(
                "failed-units",
                "systemctl --failed --all | grep -q '^0 loaded'",
            ),
        })
    }

    /// Stage that exits with the number of boots in the remote journal and
    /// expects it to equal `reboot_count`.
    #[must_use]
    pub fn boot_count_check(reboot_count: u32) -> Stage {
        Stage::new("boot-count", "exit `journalctl --list-boots | wc -l`")
            .expecting(i32::try_from(reboot_count).unwrap_or(i32::MAX))
    }
}
