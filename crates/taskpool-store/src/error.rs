//! Error types for store operations.

use taskpool_core::{CoreError, TaskKey};
use thiserror::Error;

/// Errors from the tracking service.
///
/// A lost transition race is not an error; see
/// [`TransitionOutcome::Conflict`](crate::TransitionOutcome::Conflict).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The service could not be reached or answered with a transient failure.
    #[error("tracking service unavailable: {0}")]
    Unavailable(String),

    /// The task does not exist.
    #[error("task not found: {0}")]
    NotFound(TaskKey),

    /// The request was refused for a non-transient reason.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The configured service URL cannot be used as a base for API paths.
    #[error("invalid service URL: {0}")]
    InvalidUrl(String),

    /// Domain rule violated (e.g. a transition the lifecycle forbids).
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if e.is_builder() {
            Self::Rejected {
                status: 0,
                message: e.to_string(),
            }
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}
