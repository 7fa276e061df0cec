//! Command-line interface definitions for the `ferry` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `ferry` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ferry",
    about = "Borrow a CI host, run the install and test stages, and verify it survives reboots"
)]
pub(crate) struct Cli {
    /// Log file receiving remote command output. Output goes to the
    /// terminal when omitted.
    #[arg(long, value_name = "PATH")]
    pub(crate) log: Option<Utf8PathBuf>,
    /// Operating system release to request from the pool.
    #[arg(long = "ver", value_name = "VERSION", default_value = "7")]
    pub(crate) version: String,
    /// CPU architecture to request from the pool.
    #[arg(long, value_name = "ARCH", default_value = "x86_64")]
    pub(crate) arch: String,
    /// Use an already provisioned host instead of borrowing one.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: Option<String>,
    /// Pull request id passed to the bootstrap script.
    #[arg(long, value_name = "ID")]
    pub(crate) pr: Option<String>,
    /// Do not release the borrowed host at the end of the run.
    #[arg(long)]
    pub(crate) keep: bool,
    /// Release the host held under this session token and exit.
    #[arg(long, value_name = "TOKEN", conflicts_with = "kill_all_hosts")]
    pub(crate) kill_host: Option<String>,
    /// Release every host in the pool inventory and exit.
    #[arg(long)]
    pub(crate) kill_all_hosts: bool,
    /// Enable debug logging.
    #[arg(long)]
    pub(crate) debug: bool,
}
