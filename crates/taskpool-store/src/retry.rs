//! Call-site retry for transient store failures.

use std::future::Future;

use async_trait::async_trait;
use tracing::warn;

use taskpool_core::{BackoffPolicy, Note, Task, TaskKey, TaskState};

use crate::{StoreError, TaskStore, TransitionOutcome};

/// Wraps a store and retries `Unavailable` failures with backoff.
///
/// Non-transient errors and conflicts are returned immediately. Once
/// `max_attempts` calls have failed, the last error is returned so the
/// caller can report the outage and back off at its own level.
///
/// A retried `transition` whose first attempt was applied but whose answer
/// was lost comes back as a conflict. The task is then held by nobody; the
/// staleness detector is what returns it to the queue.
pub struct RetryingStore<S> {
    inner: S,
    policy: BackoffPolicy,
    max_attempts: u32,
}

impl<S: TaskStore> RetryingStore<S> {
    pub fn new(inner: S, policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            inner,
            policy,
            max_attempts: max_attempts.max(1),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        op,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<S: TaskStore> TaskStore for RetryingStore<S> {
    async fn list_by_state(&self, team: &str, state: TaskState) -> Result<Vec<Task>, StoreError> {
        self.retry("list_by_state", || self.inner.list_by_state(team, state))
            .await
    }

    async fn get_task(&self, key: &TaskKey) -> Result<Task, StoreError> {
        self.retry("get_task", || self.inner.get_task(key)).await
    }

    async fn transition(
        &self,
        key: &TaskKey,
        from: TaskState,
        to: TaskState,
    ) -> Result<TransitionOutcome, StoreError> {
        self.retry("transition", || self.inner.transition(key, from, to))
            .await
    }

    async fn append_note(&self, key: &TaskKey, body: &str) -> Result<Note, StoreError> {
        self.retry("append_note", || self.inner.append_note(key, body))
            .await
    }
}
