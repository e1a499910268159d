//! The `TaskStore` port.

use std::sync::Arc;

use async_trait::async_trait;
use taskpool_core::{order_candidates, Note, Task, TaskKey, TaskState};

use crate::StoreError;

/// Result of a state-gated transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The store applied the transition; carries the updated task.
    Applied(Task),
    /// The task was no longer in the expected state.
    Conflict { actual: TaskState },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Operations the tracking service exposes.
///
/// Every call goes to the service; implementations must not answer from a
/// local copy.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks of `team` currently in `state`, in no particular order.
    async fn list_by_state(&self, team: &str, state: TaskState) -> Result<Vec<Task>, StoreError>;

    /// Fetch one task with its notes.
    async fn get_task(&self, key: &TaskKey) -> Result<Task, StoreError>;

    /// Move `key` from `from` to `to` if, and only if, it is still in `from`.
    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Append a note to `key`.
    async fn append_note(&self, key: &TaskKey, body: &str) -> Result<Note, StoreError>;

    /// `Todo` tasks of `team`, urgent first, oldest first within a priority.
    async fn list_candidates(&self, team: &str) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.list_by_state(team, TaskState::Todo).await?;
        tasks.retain(|t| t.state == TaskState::Todo);
        order_candidates(&mut tasks);
        Ok(tasks)
    }
}

#[async_trait]
impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    async fn list_by_state(&self, team: &str, state: TaskState) -> Result<Vec<Task>, StoreError> {
        (**self).list_by_state(team, state).await
    }

    async fn get_task(&self, key: &TaskKey) -> Result<Task, StoreError> {
        (**self).get_task(key).await
    }

    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<TransitionOutcome, StoreError> {
        (**self).transition(key, from, to).await
    }

    async fn append_note(&self, key: &TaskKey, body: &str) -> Result<Note, StoreError> {
        (**self).append_note(key, body).await
    }

    async fn list_candidates(&self, team: &str) -> Result<Vec<Task>, StoreError> {
        (**self).list_candidates(team).await
    }
}
