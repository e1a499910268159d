//! Coordinator configuration.

use std::time::Duration;

use clap::ValueEnum;

use taskpool_core::BackoffPolicy;

/// How worker processes are launched and watched.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker program and its arguments.
    pub program: String,
    pub args: Vec<String>,

    /// Extra environment for every worker (store URL, token, engine).
    pub env: Vec<(String, String)>,

    /// A worker silent for this long is treated as crashed.
    pub liveness_timeout: Duration,

    /// How long a stopping worker may take before it is killed.
    pub grace_period: Duration,

    /// Delay before each restart of a crashed slot.
    pub restart_backoff: BackoffPolicy,
}

impl SupervisorConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Builder method to add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Builder method to add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_restart_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Heartbeat interval to ask of workers: well inside the liveness timeout.
    pub fn worker_heartbeat(&self) -> Duration {
        (self.liveness_timeout / 4).max(Duration::from_secs(1))
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: "taskpool-worker".to_string(),
            args: Vec::new(),
            env: Vec::new(),
            liveness_timeout: Duration::from_secs(120),
            grace_period: Duration::from_secs(30),
            restart_backoff: BackoffPolicy::default(),
        }
    }
}

/// What the staleness detector does with a stale claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StalePolicy {
    /// Log it and count it; leave the task alone.
    #[default]
    Flag,
    /// Return the task to `Todo` so another worker can claim it.
    Reclaim,
}

/// Which notes the next executor of a reclaimed task sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReclaimNotes {
    /// Everything the previous holder wrote.
    #[default]
    Carry,
    /// Only notes written after the reclaim.
    Fresh,
}

/// Staleness detector settings.
#[derive(Debug, Clone)]
pub struct StalenessConfig {
    /// A claim not refreshed for longer than this is stale.
    pub threshold: Duration,

    /// Time between sweeps.
    pub sweep_interval: Duration,

    pub policy: StalePolicy,

    pub notes: ReclaimNotes,
}

impl StalenessConfig {
    /// Claim refresh interval to ask of workers: well inside the threshold.
    pub fn worker_refresh(&self) -> Duration {
        (self.threshold / 3).max(Duration::from_secs(1))
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
            policy: StalePolicy::default(),
            notes: ReclaimNotes::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_worker_intervals() {
        let supervisor = SupervisorConfig::default().with_liveness_timeout(Duration::from_secs(60));
        assert_eq!(supervisor.worker_heartbeat(), Duration::from_secs(15));

        let staleness = StalenessConfig {
            threshold: Duration::from_secs(2),
            ..StalenessConfig::default()
        };
        assert_eq!(staleness.worker_refresh(), Duration::from_secs(1));
    }
}
