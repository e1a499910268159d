//! taskpool CLI - run a worker pool against a team queue.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use taskpool_core::{BackoffPolicy, SystemClock, TeamRunConfig};
use taskpool_coordinator::{
    Coordinator, LogSink, ReclaimNotes, StalePolicy, StalenessConfig, StalenessDetector,
    SupervisorConfig, WebhookSink,
};
use taskpool_store::{HttpTaskStore, RetryingStore, TaskStore};

#[derive(Parser)]
#[command(name = "taskpool")]
#[command(about = "Run a pool of workers against a team's task queue", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start workers and supervise them until the queue drains
    Run(RunArgs),

    /// Run one staleness sweep and exit
    Sweep(SweepArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Tracking service base URL
    #[arg(long, env = "TASKPOOL_STORE_URL")]
    store_url: String,

    /// Bearer token for the tracking service
    #[arg(long, env = "TASKPOOL_STORE_TOKEN", hide_env_values = true)]
    store_token: Option<String>,
}

#[derive(Args)]
struct StaleArgs {
    /// Minutes without a claim refresh before a task counts as stale
    #[arg(long, default_value = "15")]
    stale_after_mins: u64,

    /// What to do with stale tasks
    #[arg(long, value_enum, default_value_t = StalePolicy::Flag)]
    stale_policy: StalePolicy,

    /// Which notes the next executor of a reclaimed task sees
    #[arg(long, value_enum, default_value_t = ReclaimNotes::Carry)]
    reclaim_notes: ReclaimNotes,
}

#[derive(Args)]
struct RunArgs {
    /// Team key (e.g. ENG)
    #[arg(short, long)]
    team: String,

    /// Number of worker slots
    #[arg(short, long, default_value = "1")]
    workers: u32,

    /// Per-task time budget in minutes
    #[arg(long, default_value = "30")]
    task_timeout_mins: u64,

    /// Stop after this many task outcomes
    #[arg(long)]
    max_tasks: Option<u32>,

    /// Restarts allowed per slot before it is retired
    #[arg(long, default_value = "3")]
    restart_budget: u32,

    /// Worker program
    #[arg(long, default_value = "taskpool-worker")]
    worker: String,

    /// Extra argument for the worker program (repeatable)
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    worker_args: Vec<String>,

    /// Engine program the workers run per task
    #[arg(long, env = "TASKPOOL_ENGINE")]
    engine: String,

    /// Seconds of silence before a worker counts as hung
    #[arg(long, default_value = "120")]
    liveness_secs: u64,

    /// Seconds a stopping worker may take before it is killed
    #[arg(long, default_value = "30")]
    grace_secs: u64,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    stale: StaleArgs,

    /// Seconds between staleness sweeps
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Do not run the staleness detector
    #[arg(long)]
    no_detector: bool,

    /// POST the run summary to this URL
    #[arg(long)]
    webhook_url: Option<String>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SweepArgs {
    /// Team key (e.g. ENG)
    #[arg(short, long)]
    team: String,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    stale: StaleArgs,
}

impl StoreArgs {
    fn connect(&self) -> Result<Arc<dyn TaskStore>, Box<dyn std::error::Error>> {
        let mut http = HttpTaskStore::new(&self.store_url)?;
        if let Some(token) = &self.store_token {
            http = http.with_token(token);
        }
        Ok(Arc::new(RetryingStore::new(http, BackoffPolicy::default(), 4)))
    }

    /// Environment that points a worker at the same service.
    fn worker_env(&self, supervisor: SupervisorConfig) -> SupervisorConfig {
        let supervisor = supervisor.with_env("TASKPOOL_STORE_URL", &self.store_url);
        match &self.store_token {
            Some(token) => supervisor.with_env("TASKPOOL_STORE_TOKEN", token),
            None => supervisor,
        }
    }
}

impl StaleArgs {
    fn config(&self, sweep_interval: Duration) -> StalenessConfig {
        StalenessConfig {
            threshold: Duration::from_secs(self.stale_after_mins * 60),
            sweep_interval,
            policy: self.stale_policy,
            notes: self.reclaim_notes,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
    }

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Sweep(args) => sweep(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "taskpool failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut team_run = TeamRunConfig::new(&args.team)
        .with_worker_count(args.workers)
        .with_task_timeout(Duration::from_secs(args.task_timeout_mins * 60))
        .with_restart_budget(args.restart_budget);
    if let Some(max) = args.max_tasks {
        team_run = team_run.with_max_tasks(max);
    }

    let mut supervisor = SupervisorConfig::new(&args.worker)
        .with_liveness_timeout(Duration::from_secs(args.liveness_secs.max(1)))
        .with_grace_period(Duration::from_secs(args.grace_secs))
        .with_env("TASKPOOL_ENGINE", &args.engine);
    for arg in &args.worker_args {
        supervisor = supervisor.with_arg(arg);
    }
    let supervisor = args.store.worker_env(supervisor);

    let mut coordinator = Coordinator::new(team_run, supervisor).with_sink(Box::new(LogSink));
    if !args.no_detector {
        let store = args.store.connect()?;
        let config = args
            .stale
            .config(Duration::from_secs(args.sweep_interval_secs.max(1)));
        coordinator = coordinator.with_detector(StalenessDetector::new(
            store,
            Arc::new(SystemClock),
            &args.team,
            config,
        ));
    }
    if let Some(url) = &args.webhook_url {
        coordinator = coordinator.with_sink(Box::new(WebhookSink::new(url)?));
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
    });

    let summary = coordinator.run(shutdown).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{}: {} completed, {} failed, {} abandoned, {} slot(s) retired ({:?})",
            summary.team,
            summary.tasks_completed,
            summary.tasks_failed,
            summary.tasks_abandoned,
            summary.slots_retired,
            summary.end_reason
        );
    }

    Ok(if summary.slots_retired > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn sweep(args: SweepArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let store = args.store.connect()?;
    let config = args.stale.config(Duration::from_secs(60));
    let detector = StalenessDetector::new(store, Arc::new(SystemClock), &args.team, config);

    let report = detector.sweep().await?;
    println!(
        "{}: checked {}, {} flagged, {} reclaimed, {} skipped",
        args.team,
        report.checked,
        report.flagged(),
        report.reclaimed(),
        report.skipped
    );
    for stale in &report.stale {
        let holder = stale
            .holder
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<12}  {:<20}  since {}  {:?}",
            stale.key.to_string(),
            holder,
            stale.since.to_rfc3339(),
            stale.action
        );
    }
    Ok(ExitCode::SUCCESS)
}
