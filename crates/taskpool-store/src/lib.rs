//! Typed view over the remote task tracking service.
//!
//! The service is the only source of truth for task state. Its single
//! concurrency primitive is a transition gated on the current state, which
//! this crate surfaces as [`TransitionOutcome::Conflict`] rather than as an
//! error. Nothing here caches task state between calls.

mod error;
mod http;
mod memory;
mod retry;
mod store;
pub mod wire;

pub use error::StoreError;
pub use http::HttpTaskStore;
pub use memory::{AppliedTransition, MemoryStore};
pub use retry::RetryingStore;
pub use store::{TaskStore, TransitionOutcome};
