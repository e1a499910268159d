//! Core domain errors.

use thiserror::Error;

/// Core domain errors for taskpool.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task key is not of the form `TEAM-N`.
    #[error("Invalid task key: {0}")]
    InvalidTaskKey(String),

    /// Transition not allowed by the task lifecycle.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A worker status line could not be parsed.
    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),

    /// Run configuration failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
