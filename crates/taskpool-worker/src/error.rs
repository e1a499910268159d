//! Error types for the worker.

use thiserror::Error;

use taskpool_core::CoreError;
use taskpool_store::StoreError;

/// Errors raised by an execution engine invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to spawn the engine process.
    #[error("Failed to spawn engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O error while talking to the engine.
    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not encode the request for the engine.
    #[error("Engine request encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Engine did not finish within the task budget.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors that end a worker run.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The status stream could not be written; the coordinator is gone.
    #[error("Status stream closed: {0}")]
    Status(#[source] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
