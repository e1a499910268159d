//! Task and note types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claim::{ClaimMarker, ReclaimMarker};
use crate::{Priority, TaskKey, TaskState, WorkerId};

/// An append-only note attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Identifier assigned by the tracking service.
    pub id: String,

    /// Free-text body. Claim and reclaim markers are encoded here.
    pub body: String,

    /// When the note was appended.
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// Parse this note as a claim marker, if it is one.
    pub fn claim_marker(&self) -> Option<ClaimMarker> {
        ClaimMarker::parse(&self.body)
    }

    /// Parse this note as a reclaim boundary, if it is one.
    pub fn reclaim_marker(&self) -> Option<ReclaimMarker> {
        ReclaimMarker::parse(&self.body)
    }

    /// Whether this note is protocol bookkeeping rather than human text.
    pub fn is_marker(&self) -> bool {
        self.claim_marker().is_some() || self.reclaim_marker().is_some()
    }
}

/// A unit of work tracked by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Team-scoped key, e.g. `ENG-12`.
    pub key: TaskKey,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub priority: Priority,

    pub state: TaskState,

    /// Owning team key.
    pub team: String,

    #[serde(default)]
    pub project: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Ordered oldest first.
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Task {
    /// Create a new task in `Todo`.
    pub fn new(key: TaskKey, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            team: key.team().to_string(),
            key,
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            state: TaskState::Todo,
            project: None,
            created_at: now,
            updated_at: now,
            notes: Vec::new(),
        }
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder method to set the state.
    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    /// Builder method to set the project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Number of reclaim boundaries written on this task.
    ///
    /// Every reclaim starts a new claim epoch; only markers stamped with
    /// the current epoch describe the live claim.
    pub fn claim_epoch(&self) -> u32 {
        self.notes
            .iter()
            .filter(|n| n.reclaim_marker().is_some())
            .count() as u32
    }

    fn current_claims(&self) -> impl Iterator<Item = ClaimMarker> + '_ {
        let epoch = self.claim_epoch();
        self.notes
            .iter()
            .filter_map(Note::claim_marker)
            .filter(move |m| m.epoch == epoch)
    }

    /// The most recently appended claim marker of the current epoch.
    pub fn latest_claim(&self) -> Option<ClaimMarker> {
        self.current_claims().last()
    }

    /// Whether `worker` has a claim marker in the current epoch.
    ///
    /// A worker whose claim was reclaimed never regains it by appending
    /// more markers: those carry its old epoch.
    pub fn held_by(&self, worker: &WorkerId) -> bool {
        self.current_claims().any(|m| &m.worker_id == worker)
    }

    /// Notes an executor should see for this task.
    ///
    /// Markers are dropped. If the latest reclaim boundary asked for a
    /// fresh start, only notes after that boundary are returned; the
    /// earlier notes stay in the store untouched.
    pub fn notes_for_execution(&self) -> Vec<&Note> {
        let start = self
            .notes
            .iter()
            .rposition(|n| n.reclaim_marker().is_some_and(|m| !m.carry_notes))
            .map(|idx| idx + 1)
            .unwrap_or(0);

        self.notes[start..].iter().filter(|n| !n.is_marker()).collect()
    }
}

/// Order candidates for claiming: priority descending, then oldest key.
pub fn order_candidates(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| a.key.cmp(&b.key))
    });
}
