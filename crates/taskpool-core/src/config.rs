//! Run configuration.

use std::time::Duration;

use crate::CoreError;

/// Immutable configuration for one coordinated run.
///
/// Built once by the caller and handed to the coordinator, which never
/// mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRunConfig {
    /// Team whose queue the run drains.
    pub team: String,

    /// Number of worker slots to keep alive.
    pub worker_count: u32,

    /// Upper bound on one engine invocation.
    pub task_timeout: Duration,

    /// Stop once this many tasks reached a terminal outcome.
    pub max_tasks: Option<u32>,

    /// Restarts allowed per slot before it is retired.
    pub restart_budget: u32,
}

impl TeamRunConfig {
    /// Create a config with defaults for everything but the team.
    pub fn new(team: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            ..Self::default()
        }
    }

    /// Builder method to set the worker count.
    pub fn with_worker_count(mut self, count: u32) -> Self {
        self.worker_count = count;
        self
    }

    /// Builder method to set the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Builder method to cap the number of tasks.
    pub fn with_max_tasks(mut self, max: u32) -> Self {
        self.max_tasks = Some(max);
        self
    }

    /// Builder method to set the restart budget.
    pub fn with_restart_budget(mut self, budget: u32) -> Self {
        self.restart_budget = budget;
        self
    }

    /// Reject configurations that cannot drive a run.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.team.trim().is_empty() {
            return Err(CoreError::InvalidConfig("team key is empty".to_string()));
        }
        if self.worker_count == 0 {
            return Err(CoreError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(CoreError::InvalidConfig(
                "task timeout must be positive".to_string(),
            ));
        }
        if self.max_tasks == Some(0) {
            return Err(CoreError::InvalidConfig(
                "max tasks must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TeamRunConfig {
    fn default() -> Self {
        Self {
            team: String::new(),
            worker_count: 2,
            task_timeout: Duration::from_secs(30 * 60),
            max_tasks: None,
            restart_budget: 3,
        }
    }
}
