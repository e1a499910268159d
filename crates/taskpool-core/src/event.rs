//! Worker status stream records.
//!
//! A worker writes one JSON object per line on stdout; the coordinator
//! parses each line on its own. Commands flow the other way on stdin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, TaskKey, WorkerId};

/// Kind of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEvent {
    /// Process is up and about to claim.
    Started,
    /// Won the claim on `task_id`.
    Claimed,
    /// Still alive; `task_id` is the task in hand, if any.
    Heartbeat,
    /// Engine reported success for `task_id`.
    Completed,
    /// Engine reported failure for `task_id`; `detail` carries the reason.
    Failed,
    /// Worker let go of `task_id` without recording an outcome, because the
    /// claim was lost or the store refused the write.
    Abandoned,
    /// Store retries exhausted; the worker is backing off.
    StoreUnavailable,
    /// No candidates left; the worker is exiting.
    Drained,
    /// Shutdown requested; the worker is exiting without claiming more.
    Stopped,
}

impl StatusEvent {
    /// Whether this event closes out a claimed task.
    pub fn is_task_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Abandoned)
    }
}

/// One line of a worker's status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLine {
    pub worker_id: WorkerId,
    pub timestamp: DateTime<Utc>,
    pub event: StatusEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusLine {
    /// Create a new status line with the current timestamp.
    pub fn new(worker_id: WorkerId, event: StatusEvent) -> Self {
        Self {
            worker_id,
            timestamp: Utc::now(),
            event,
            task_id: None,
            detail: None,
        }
    }

    /// Builder method to attach the task in hand.
    pub fn with_task(mut self, task_id: TaskKey) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Builder method to attach free-text detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn started(worker_id: WorkerId) -> Self {
        Self::new(worker_id, StatusEvent::Started)
    }

    pub fn claimed(worker_id: WorkerId, task_id: TaskKey) -> Self {
        Self::new(worker_id, StatusEvent::Claimed).with_task(task_id)
    }

    pub fn heartbeat(worker_id: WorkerId, task_id: Option<TaskKey>) -> Self {
        let mut line = Self::new(worker_id, StatusEvent::Heartbeat);
        line.task_id = task_id;
        line
    }

    pub fn completed(worker_id: WorkerId, task_id: TaskKey) -> Self {
        Self::new(worker_id, StatusEvent::Completed).with_task(task_id)
    }

    pub fn failed(worker_id: WorkerId, task_id: TaskKey, reason: impl Into<String>) -> Self {
        Self::new(worker_id, StatusEvent::Failed)
            .with_task(task_id)
            .with_detail(reason)
    }

    pub fn abandoned(worker_id: WorkerId, task_id: TaskKey, reason: impl Into<String>) -> Self {
        Self::new(worker_id, StatusEvent::Abandoned)
            .with_task(task_id)
            .with_detail(reason)
    }

    pub fn store_unavailable(worker_id: WorkerId, detail: impl Into<String>) -> Self {
        Self::new(worker_id, StatusEvent::StoreUnavailable).with_detail(detail)
    }

    pub fn drained(worker_id: WorkerId) -> Self {
        Self::new(worker_id, StatusEvent::Drained)
    }

    pub fn stopped(worker_id: WorkerId) -> Self {
        Self::new(worker_id, StatusEvent::Stopped)
    }

    /// Parse one line of the stream.
    pub fn parse(line: &str) -> Result<Self, CoreError> {
        serde_json::from_str(line.trim()).map_err(|e| CoreError::InvalidStatusLine(e.to_string()))
    }

    /// Encode as a single line (no trailing newline).
    pub fn to_line(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Commands the coordinator sends to a worker on stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Stop claiming, finish the task in hand, then exit.
    Shutdown,
}

impl WorkerCommand {
    pub fn parse(line: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn to_line(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}
