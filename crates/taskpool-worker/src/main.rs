//! taskpool worker process

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use taskpool_core::{BackoffPolicy, WorkerId};
use taskpool_store::{HttpTaskStore, RetryingStore};
use taskpool_worker::{
    listen_for_shutdown, CommandEngine, StatusEmitter, Worker, WorkerConfig, WorkerError,
    WorkerExit, EXIT_ERROR,
};

#[derive(Parser, Debug)]
#[command(name = "taskpool-worker")]
#[command(about = "Claim and execute tasks from a team queue")]
#[command(version)]
struct Args {
    /// Team whose queue to drain
    #[arg(long, env = "TASKPOOL_TEAM")]
    team: String,

    /// Worker id reported in status lines (random if omitted)
    #[arg(long, env = "TASKPOOL_WORKER_ID")]
    worker_id: Option<String>,

    /// Tracking service base URL
    #[arg(long, env = "TASKPOOL_STORE_URL")]
    store_url: String,

    /// Bearer token for the tracking service
    #[arg(long, env = "TASKPOOL_STORE_TOKEN", hide_env_values = true)]
    store_token: Option<String>,

    /// Engine program run once per task
    #[arg(long, env = "TASKPOOL_ENGINE")]
    engine: String,

    /// Extra argument for the engine (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Per-task time budget in seconds
    #[arg(long, env = "TASKPOOL_TASK_TIMEOUT_SECS", default_value = "1800")]
    task_timeout_secs: u64,

    /// Seconds between heartbeat lines while a task runs
    #[arg(long, env = "TASKPOOL_HEARTBEAT_SECS", default_value = "15")]
    heartbeat_secs: u64,

    /// Seconds between claim marker refreshes while a task runs
    #[arg(long, env = "TASKPOOL_CLAIM_REFRESH_SECS", default_value = "60")]
    claim_refresh_secs: u64,

    /// Attempts per store call before reporting an outage
    #[arg(long, default_value = "4")]
    store_attempts: u32,

    /// Consecutive outages before exiting with code 2
    #[arg(long, default_value = "5")]
    max_store_failures: u32,

    /// Do not treat stdin as the coordinator's control channel
    #[arg(long)]
    no_stdin_control: bool,
}

impl Args {
    fn into_config(self) -> WorkerConfig {
        let defaults = WorkerConfig::default();
        WorkerConfig {
            worker_id: self.worker_id.map(WorkerId::new).unwrap_or(defaults.worker_id),
            team: self.team,
            store_url: self.store_url,
            store_token: self.store_token,
            engine_program: self.engine,
            engine_args: self.engine_args,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
            claim_refresh_interval: Duration::from_secs(self.claim_refresh_secs.max(1)),
            store_retry: BackoffPolicy::default(),
            store_attempts: self.store_attempts,
            max_store_failures: self.max_store_failures.max(1),
        }
    }
}

fn main() -> ExitCode {
    // Stdout carries the status stream, so logs go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
    }

    let args = Args::parse();
    let stdin_control = !args.no_stdin_control;
    let config = args.into_config();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::from(EXIT_ERROR as u8);
        }
    };
    let result = runtime.block_on(run(config, stdin_control));
    // The stdin reader sits in a blocking read that cannot be cancelled.
    runtime.shutdown_background();

    match result {
        Ok(exit) => {
            info!(?exit, "Worker exiting");
            ExitCode::from(exit.exit_code() as u8)
        }
        Err(e) => {
            error!(error = %e, "Worker failed");
            ExitCode::from(EXIT_ERROR as u8)
        }
    }
}

async fn run(config: WorkerConfig, stdin_control: bool) -> Result<WorkerExit, WorkerError> {
    if config.team.trim().is_empty() {
        return Err(WorkerError::Config("team must not be empty".to_string()));
    }

    info!(
        worker_id = %config.worker_id,
        team = %config.team,
        store = %config.store_url,
        engine = %config.engine_program,
        "Starting taskpool worker"
    );

    let mut http = HttpTaskStore::new(&config.store_url)?;
    if let Some(token) = &config.store_token {
        http = http.with_token(token);
    }
    let store = Arc::new(RetryingStore::new(
        http,
        config.store_retry.clone(),
        config.store_attempts,
    ));
    let engine = Arc::new(
        CommandEngine::new(&config.engine_program).with_args(config.engine_args.iter().cloned()),
    );

    let shutdown = CancellationToken::new();
    if stdin_control {
        listen_for_shutdown(tokio::io::stdin(), shutdown.clone());
    }

    let status = StatusEmitter::stdout(config.worker_id.clone());
    let worker = Worker::new(config, store, engine, status, shutdown.clone());
    let exit = worker.run().await;
    shutdown.cancel();
    exit
}
