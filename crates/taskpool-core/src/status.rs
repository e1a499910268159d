//! Status enums for tasks and worker slots.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Task priority as assigned in the tracking service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort rank: lower claims first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// Lifecycle state of a task in the tracking service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not yet ready for work. Failed tasks are parked here for triage.
    #[default]
    Backlog,
    /// Ready to be claimed.
    Todo,
    /// Actively held by exactly one worker.
    InProgress,
    /// Finished.
    Done,
    /// Abandoned by a human; never leaves this state.
    Cancelled,
}

impl TaskState {
    /// Whether the lifecycle allows moving from `self` to `to`.
    ///
    /// `Done -> InProgress` is the regression path. `InProgress -> Todo`
    /// is the staleness reclaim path. There is no `Backlog -> Done`.
    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::{Backlog, Cancelled, Done, InProgress, Todo};
        matches!(
            (self, to),
            (Backlog, Todo)
                | (Backlog, Cancelled)
                | (Todo, InProgress)
                | (Todo, Backlog)
                | (Todo, Cancelled)
                | (InProgress, Done)
                | (InProgress, Todo)
                | (InProgress, Backlog)
                | (InProgress, Cancelled)
                | (Done, InProgress)
        )
    }

    /// Check a transition, returning an error if the lifecycle forbids it.
    pub fn check_transition(self, to: TaskState) -> Result<(), CoreError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Wire name, as used in query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a coordinator worker slot.
///
/// `Spawning -> Running -> {Exited(code) | Crashed}`, then
/// `Crashed -> Restarting -> Spawning` while the restart budget lasts,
/// otherwise `Crashed -> Retired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "code")]
pub enum WorkerState {
    Spawning,
    Running,
    Exited(i32),
    Crashed,
    Restarting,
    Retired,
}

impl WorkerState {
    /// Returns true if the slot will not launch another process.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::Retired)
    }

    /// Returns true while a process is (or is about to be) alive.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Spawning | Self::Running)
    }
}
