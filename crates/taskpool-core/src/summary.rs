//! Run summary produced by the coordinator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SlotId, WorkerId};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Every slot stopped on its own: drained or retired.
    Drained,
    /// The configured maximum task count was reached.
    TaskBudget,
    /// An external shutdown signal arrived.
    Shutdown,
}

/// Terminal state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOutcome {
    /// Last process exited 0 after finding no work.
    Drained,
    /// Last process exited 0 (or was terminated) because the run was stopping.
    Stopped,
    /// Restart budget exhausted; the slot gave up.
    Retired,
}

/// Per-slot accounting in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotReport {
    pub slot: SlotId,
    pub worker_id: WorkerId,
    pub outcome: SlotOutcome,
    pub restarts: u32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    /// Last crash or hang reason, if the slot ever failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Aggregate result of a coordinated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub team: String,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    /// Tasks a worker let go of without recording an outcome.
    #[serde(default)]
    pub tasks_abandoned: u32,
    pub slots_retired: u32,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub slots: Vec<SlotReport>,
    /// Stale claims the detector flagged during the run.
    pub stale_flagged: u32,
    /// Stale claims the detector returned to `Todo`.
    pub stale_reclaimed: u32,
    /// Store outages reported by workers or the detector.
    pub store_failures: u32,
}

impl RunSummary {
    /// True if nothing failed and no slot was retired.
    pub fn is_clean(&self) -> bool {
        self.tasks_failed == 0 && self.slots_retired == 0 && self.store_failures == 0
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
