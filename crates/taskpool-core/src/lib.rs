//! taskpool Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The remote tracking service
//! - OS processes
//! - Async runtime specifics
//!
//! Everything that crosses a boundary (store, worker stdout, run summary)
//! is described here so both sides of that boundary agree on it.

pub mod backoff;
pub mod claim;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod summary;
pub mod task;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use claim::{ClaimMarker, ReclaimMarker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TeamRunConfig;
pub use error::CoreError;
pub use event::{StatusEvent, StatusLine, WorkerCommand};
pub use ids::{SlotId, TaskKey, WorkerId};
pub use status::{Priority, TaskState, WorkerState};
pub use summary::{EndReason, RunSummary, SlotOutcome, SlotReport};
pub use task::{order_candidates, Note, Task};
