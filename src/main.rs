//! Binary entry point for the Ferry CLI.

use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ferry::{
    ConfigError, DuffyPool, FAILURE_EXIT_CODE, HostTarget, Janitor, LivenessProber, LogSink,
    Orchestrator, PoolConfig, PoolError, PoolRequest, ProbeConfig, ProcessCommandRunner,
    RemoteExecutor, RunRequest, SessionToken, SshConfig, StageConfig, StagePlan,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to open log file {path}: {message}")]
    Log { path: String, message: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            FAILURE_EXIT_CODE
        }
    };

    process::exit(exit_code);
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let pool_config = PoolConfig::load_without_cli_args()?;
    let pool = DuffyPool::new(&pool_config)?;

    if let Some(token) = cli.kill_host {
        Janitor::new(pool)
            .release_one(&SessionToken::new(token))
            .await?;
        return Ok(0);
    }

    if cli.kill_all_hosts {
        let summary = Janitor::new(pool).sweep().await?;
        info!(released = summary.released, "inventory sweep complete");
        return Ok(0);
    }

    let sink = open_sink(cli.log.as_deref())?;
    let orchestrator = Orchestrator::new(
        pool,
        RemoteExecutor::new(SshConfig::load_without_cli_args()?, ProcessCommandRunner)?,
        LivenessProber::new(ProbeConfig::load_without_cli_args()?, ProcessCommandRunner)?,
        StagePlan::new(&StageConfig::load_without_cli_args()?, cli.pr.as_deref())?,
    );

    let target = match cli.host {
        Some(host) => HostTarget::Supplied(host),
        None => HostTarget::Acquire(PoolRequest {
            version: cli.version,
            arch: cli.arch,
        }),
    };
    let request = RunRequest {
        target,
        keep: cli.keep,
    };

    let report = orchestrator.run(&request, &sink).await;
    Ok(report.exit_code())
}

fn open_sink(path: Option<&Utf8Path>) -> Result<LogSink, CliError> {
    match path {
        Some(path) => LogSink::create(path).map_err(|err| CliError::Log {
            path: path.to_string(),
            message: err.to_string(),
        }),
        None => Ok(LogSink::terminal()),
    }
}
