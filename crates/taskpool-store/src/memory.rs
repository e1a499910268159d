//! In-process store with the same conflict semantics as the service.
//!
//! Used by tests and by the HTTP fixture that stands in for the tracking
//! service. Writes are serialized by a single lock, which is exactly the
//! guarantee the remote service gives for one `transition` call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use taskpool_core::{Clock, Note, SystemClock, Task, TaskKey, TaskState};

use crate::{StoreError, TaskStore, TransitionOutcome};

/// A transition the store accepted, kept for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransition {
    pub key: TaskKey,
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    tasks: BTreeMap<TaskKey, Task>,
    history: Vec<AppliedTransition>,
}

/// Thread-safe in-memory task store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    /// Number of upcoming calls that fail with `Unavailable`.
    outage: AtomicU32,
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that stamps notes and updates with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            outage: AtomicU32::new(0),
        }
    }

    /// Insert or replace a task.
    pub async fn insert(&self, task: Task) {
        self.inner.write().await.tasks.insert(task.key.clone(), task);
    }

    /// Current copy of a task.
    pub async fn snapshot(&self, key: &TaskKey) -> Option<Task> {
        self.inner.read().await.tasks.get(key).cloned()
    }

    /// Current copy of every task.
    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.read().await.tasks.values().cloned().collect()
    }

    /// Every accepted transition, in the order the store applied them.
    pub async fn history(&self) -> Vec<AppliedTransition> {
        self.inner.read().await.history.clone()
    }

    /// Make the next `calls` operations fail with `Unavailable`.
    pub fn fail_next(&self, calls: u32) {
        self.outage.store(calls, Ordering::SeqCst);
    }

    fn check_outage(&self) -> Result<(), StoreError> {
        let tripped = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("injected outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_by_state(&self, team: &str, state: TaskState) -> Result<Vec<Task>, StoreError> {
        self.check_outage()?;
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.team == team && t.state == state)
            .cloned()
            .collect())
    }

    async fn get_task(&self, key: &TaskKey) -> Result<Task, StoreError> {
        self.check_outage()?;
        self.snapshot(key)
            .await
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<TransitionOutcome, StoreError> {
        self.check_outage()?;
        from.check_transition(to)?;

        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if task.state != from {
            debug!(task = %key, expected = %from, actual = %task.state, "transition conflict");
            return Ok(TransitionOutcome::Conflict { actual: task.state });
        }

        task.state = to;
        task.updated_at = now;
        let updated = task.clone();
        inner.history.push(AppliedTransition {
            key: key.clone(),
            from,
            to,
            at: now,
        });
        Ok(TransitionOutcome::Applied(updated))
    }

    async fn append_note(&self, key: &TaskKey, body: &str) -> Result<Note, StoreError> {
        self.check_outage()?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let note = Note {
            id: uuid::Uuid::new_v4().to_string(),
            body: body.to_string(),
            created_at: now,
        };
        task.notes.push(note.clone());
        task.updated_at = now;
        Ok(note)
    }
}
