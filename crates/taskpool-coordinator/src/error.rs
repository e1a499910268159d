//! Error types for the coordinator.

use std::time::Duration;

use thiserror::Error;

use taskpool_core::CoreError;
use taskpool_store::StoreError;

/// Why one worker process stopped counting as healthy.
///
/// Every variant is a crash for restart purposes.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("status stream failed: {0}")]
    Stream(#[source] std::io::Error),

    #[error("no status line for {0:?}")]
    Hung(Duration),

    #[error("worker exited with code {0}")]
    Exit(i32),

    #[error("worker killed by signal")]
    Signaled,

    #[error("worker closed its status stream without exiting")]
    Lingering,
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Summary delivery failures.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {0}")]
    Rejected(u16),
}
