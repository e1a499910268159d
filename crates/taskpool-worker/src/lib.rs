//! taskpool worker
//!
//! A worker is one OS process that repeatedly claims a task from the
//! tracking service, runs the execution engine on it, and records the
//! outcome. It reports progress as JSON lines on stdout and takes
//! commands on stdin; logs go to stderr.

pub mod claim;
pub mod config;
pub mod engine;
pub mod error;
pub mod runner;
pub mod shutdown;
pub mod status;

pub use claim::{ClaimOutcome, ClaimProtocol};
pub use config::WorkerConfig;
pub use engine::{CommandEngine, EngineOutcome, EngineRequest, ExecutionEngine};
pub use error::{EngineError, WorkerError};
pub use runner::{Worker, WorkerExit, EXIT_ERROR, EXIT_OK, EXIT_STORE_UNAVAILABLE};
pub use shutdown::listen_for_shutdown;
pub use status::{CapturedLines, StatusEmitter};
