//! taskpool coordinator
//!
//! Runs a pool of worker processes against one team's queue. Each slot is
//! supervised independently: its status stream is read, silence is treated
//! as a hang, and crashes are restarted with backoff until the slot's
//! restart budget runs out. A staleness detector sweeps the store for
//! claims whose holder stopped refreshing them.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod sink;
pub mod staleness;
pub mod supervisor;

pub use config::{ReclaimNotes, StalePolicy, StalenessConfig, SupervisorConfig};
pub use coordinator::{Coordinator, WorkerDescriptor};
pub use error::{CoordinatorError, SinkError, SupervisorError};
pub use sink::{LogSink, SummarySink, WebhookSink};
pub use staleness::{StaleAction, StaleTask, StalenessDetector, StalenessTotals, SweepReport};
pub use supervisor::{SlotEvent, WorkerProcess};
