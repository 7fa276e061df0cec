//! Configuration loading via `ortho-config`.
//!
//! Every component reads the same `ferry.toml`, taking only the keys it
//! knows: defaults are merged with the file and then with the component's
//! `FERRY_*` environment variables.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8Path;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::paths;

/// Default pool API endpoint.
pub const DEFAULT_POOL_API_URL: &str = "http://admin.ci.centos.org:8080";

/// Default location of the file holding the pool API key.
pub const DEFAULT_KEY_FILE: &str = "duffy.key";

/// Pool service settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FERRY_POOL",
    discovery(
        app_name = "ferry",
        env_var = "FERRY_CONFIG_PATH",
        config_file_name = "ferry.toml",
        dotfile_name = ".ferry.toml",
        project_file_name = "ferry.toml"
    )
)]
pub struct PoolConfig {
    /// Base URL of the pool API.
    #[ortho_config(default = DEFAULT_POOL_API_URL.to_owned())]
    pub api_url: String,
    /// API key. Takes precedence over `key_file` when set.
    pub api_key: Option<String>,
    /// File containing the API key; trailing whitespace is stripped.
    #[ortho_config(default = DEFAULT_KEY_FILE.to_owned())]
    pub key_file: String,
}

/// SSH client settings used for every remote command.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FERRY_SSH",
    discovery(
        app_name = "ferry",
        env_var = "FERRY_CONFIG_PATH",
        config_file_name = "ferry.toml",
        dotfile_name = ".ferry.toml",
        project_file_name = "ferry.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub bin: String,
    /// Remote account; the bootstrap scripts need root.
    #[ortho_config(default = "root".to_owned())]
    pub user: String,
    /// Seconds allowed for establishing the connection.
    #[ortho_config(default = 180)]
    pub connect_timeout_secs: u32,
    /// Known hosts file; `/dev/null` because pool hosts are reinstalled
    /// between loans and their keys change.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Skips forced TTY allocation (`-tt`). Install and reboot commands can
    /// hang without a controlling terminal, so this stays off by default.
    #[ortho_config(default = false)]
    pub disable_tty: bool,
}

/// Reachability probe and reboot settle settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FERRY_PROBE",
    discovery(
        app_name = "ferry",
        env_var = "FERRY_CONFIG_PATH",
        config_file_name = "ferry.toml",
        dotfile_name = ".ferry.toml",
        project_file_name = "ferry.toml"
    )
)]
pub struct ProbeConfig {
    /// Path to the `ping` executable.
    #[ortho_config(default = "ping".to_owned())]
    pub ping_bin: String,
    /// Maximum number of pings before the host is declared unreachable.
    #[ortho_config(default = 20)]
    pub max_attempts: u32,
    /// Seconds each ping waits for a reply.
    #[ortho_config(default = 10)]
    pub attempt_timeout_secs: u32,
    /// Seconds to wait after issuing a reboot before probing.
    #[ortho_config(default = 30)]
    pub settle_before_secs: u64,
    /// Seconds to wait after the host answers before running commands.
    #[ortho_config(default = 20)]
    pub settle_after_secs: u64,
}

/// Location of the CI scripts cloned onto the host.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "FERRY_STAGES",
    discovery(
        app_name = "ferry",
        env_var = "FERRY_CONFIG_PATH",
        config_file_name = "ferry.toml",
        dotfile_name = ".ferry.toml",
        project_file_name = "ferry.toml"
    )
)]
pub struct StageConfig {
    /// Base URL the repository name is appended to.
    #[ortho_config(default = "https://github.com/systemd/".to_owned())]
    pub repo_base_url: String,
    /// Repository holding the `slave/` scripts.
    #[ortho_config(default = "systemd-centos-ci".to_owned())]
    pub repo_name: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to ferry.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

fn no_cli_args() -> [OsString; 1] {
    [OsString::from("ferry")]
}

impl PoolConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(no_cli_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.api_url,
            &FieldMetadata::new("pool API URL", "FERRY_POOL_API_URL", "api_url"),
        )?;
        if self.api_key.is_none() {
            require_field(
                &self.key_file,
                &FieldMetadata::new("pool API key file", "FERRY_POOL_KEY_FILE", "key_file"),
            )?;
        }
        Ok(())
    }

    /// Returns the API key, reading `key_file` when no key is set directly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::KeyFile`] when the file cannot be read and
    /// [`ConfigError::MissingField`] when the resolved key is blank.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        self.validate()?;
        let key = match &self.api_key {
            Some(key) => key.trim().to_owned(),
            None => paths::read_to_string(Utf8Path::new(&self.key_file))
                .map_err(|err| ConfigError::KeyFile {
                    path: self.key_file.clone(),
                    message: err.to_string(),
                })?
                .trim_end()
                .to_owned(),
        };
        require_field(
            &key,
            &FieldMetadata::new("pool API key", "FERRY_POOL_API_KEY", "api_key"),
        )?;
        Ok(key)
    }
}

impl SshConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(no_cli_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] for a zero connect timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.bin,
            &FieldMetadata::new("ssh executable", "FERRY_SSH_BIN", "bin"),
        )?;
        require_field(
            &self.user,
            &FieldMetadata::new("remote user", "FERRY_SSH_USER", "user"),
        )?;
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "connect_timeout_secs must be greater than zero",
            )));
        }
        Ok(())
    }
}

impl ProbeConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(no_cli_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for an empty ping path and
    /// [`ConfigError::Invalid`] for zero attempts or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.ping_bin,
            &FieldMetadata::new("ping executable", "FERRY_PROBE_PING_BIN", "ping_bin"),
        )?;
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_attempts must be greater than zero",
            )));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "attempt_timeout_secs must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Delay between issuing a reboot and the first probe.
    #[must_use]
    pub const fn settle_before(&self) -> Duration {
        Duration::from_secs(self.settle_before_secs)
    }

    /// Delay between a successful probe and the next remote command.
    #[must_use]
    pub const fn settle_after(&self) -> Duration {
        Duration::from_secs(self.settle_after_secs)
    }
}

impl StageConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(no_cli_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.repo_base_url,
            &FieldMetadata::new(
                "repository base URL",
                "FERRY_STAGES_REPO_BASE_URL",
                "repo_base_url",
            ),
        )?;
        require_field(
            &self.repo_name,
            &FieldMetadata::new("repository name", "FERRY_STAGES_REPO_NAME", "repo_name"),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when the API key file cannot be read.
    #[error("failed to read pool API key from {path}: {message}")]
    KeyFile {
        /// Path that was read.
        path: String,
        /// Operating system error string.
        message: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
