//! Worker configuration.

use std::time::Duration;

use taskpool_core::{BackoffPolicy, WorkerId};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID, stable for the slot across restarts.
    pub worker_id: WorkerId,

    /// Team whose queue this worker drains.
    pub team: String,

    /// Base URL of the tracking service.
    pub store_url: String,

    /// Optional bearer token for the tracking service.
    pub store_token: Option<String>,

    /// Engine program and its arguments.
    pub engine_program: String,
    pub engine_args: Vec<String>,

    /// Upper bound on one engine invocation.
    pub task_timeout: Duration,

    /// Interval between `heartbeat` status lines.
    pub heartbeat_interval: Duration,

    /// Interval between refreshed claim markers while a task executes.
    pub claim_refresh_interval: Duration,

    /// Backoff between retries of a single store call.
    pub store_retry: BackoffPolicy,

    /// Attempts per store call before the call is reported as failed.
    pub store_attempts: u32,

    /// Consecutive failed claim rounds tolerated before exiting with code 2.
    pub max_store_failures: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::generate(),
            team: String::new(),
            store_url: "http://127.0.0.1:8080".to_string(),
            store_token: None,
            engine_program: "taskpool-engine".to_string(),
            engine_args: Vec::new(),
            task_timeout: Duration::from_secs(30 * 60),
            heartbeat_interval: Duration::from_secs(15),
            claim_refresh_interval: Duration::from_secs(60),
            store_retry: BackoffPolicy::doubling(Duration::from_millis(500), Duration::from_secs(10)),
            store_attempts: 4,
            max_store_failures: 5,
        }
    }
}
