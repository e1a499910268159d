//! Claim protocol.
//!
//! The store's only concurrency primitive is a state-gated transition, so a
//! claim is: list `Todo` candidates, append a claim marker, then attempt
//! `Todo -> InProgress`. Exactly one concurrent attempt can win; the losers
//! see `Conflict` and move on to the next candidate. Nothing about which
//! tasks are claimed is cached between rounds.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskpool_core::{ClaimMarker, Clock, Task, TaskKey, TaskState, WorkerId};
use taskpool_store::{StoreError, TaskStore, TransitionOutcome};

/// Result of one claim round.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This worker now holds the only active claim on the task.
    Claimed(Task),
    /// No candidate could be claimed.
    Drained,
    /// Shutdown was requested before a claim was made.
    Stopped,
}

/// Whether a worker still holds the claim it is executing under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holding {
    Held,
    /// The claim was reclaimed or the task left `InProgress`; carries the
    /// state the task is in now.
    Lost(TaskState),
}

/// Claims tasks for one worker.
pub struct ClaimProtocol {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    team: String,
    worker_id: WorkerId,
}

impl ClaimProtocol {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        team: impl Into<String>,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            store,
            clock,
            team: team.into(),
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Claim the best available candidate.
    ///
    /// Candidates lost to another claimant are never retried within the
    /// round. When every listed candidate has been lost, the queue is
    /// treated as drained for this worker. `shutdown` is checked before
    /// each attempt so no claim starts once it is cancelled.
    pub async fn claim_next(&self, shutdown: &CancellationToken) -> Result<ClaimOutcome, StoreError> {
        let mut lost: HashSet<TaskKey> = HashSet::new();

        loop {
            if shutdown.is_cancelled() {
                return Ok(ClaimOutcome::Stopped);
            }

            let candidates: Vec<Task> = self
                .store
                .list_candidates(&self.team)
                .await?
                .into_iter()
                .filter(|t| !lost.contains(&t.key))
                .collect();

            if candidates.is_empty() {
                debug!(worker_id = %self.worker_id, lost = lost.len(), "No claimable candidates");
                return Ok(ClaimOutcome::Drained);
            }

            for candidate in candidates {
                if shutdown.is_cancelled() {
                    return Ok(ClaimOutcome::Stopped);
                }

                match self.try_claim(&candidate).await? {
                    Some(task) => {
                        info!(worker_id = %self.worker_id, task = %task.key, "Claimed task");
                        return Ok(ClaimOutcome::Claimed(task));
                    }
                    None => {
                        lost.insert(candidate.key);
                    }
                }
            }
        }
    }

    /// One claim attempt. `None` means another claimant got there first
    /// or the task left `Todo`.
    async fn try_claim(&self, candidate: &Task) -> Result<Option<Task>, StoreError> {
        let key = &candidate.key;
        let epoch = candidate.claim_epoch();
        match self.store.append_note(key, &self.marker(epoch).to_note_body()).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                debug!(task = %key, "Candidate vanished before claim");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        match self
            .store
            .transition(key, TaskState::Todo, TaskState::InProgress)
            .await?
        {
            TransitionOutcome::Applied(task) => {
                let current = task.claim_epoch();
                if current != epoch {
                    // The listing predates a reclaim; restamp for the epoch we won in.
                    if let Err(e) = self
                        .store
                        .append_note(key, &self.marker(current).to_note_body())
                        .await
                    {
                        warn!(task = %key, error = %e, "Could not restamp claim marker");
                    }
                }
                Ok(Some(task))
            }
            TransitionOutcome::Conflict { actual } => {
                debug!(
                    worker_id = %self.worker_id,
                    task = %key,
                    actual = %actual,
                    "Lost claim race"
                );
                Ok(None)
            }
        }
    }

    /// Re-read the task and decide whether the claim made in `epoch` is
    /// still this worker's.
    pub async fn check(&self, key: &TaskKey, epoch: u32) -> Result<Holding, StoreError> {
        let task = self.store.get_task(key).await?;
        if task.state == TaskState::InProgress
            && task.claim_epoch() == epoch
            && task.held_by(&self.worker_id)
        {
            Ok(Holding::Held)
        } else {
            Ok(Holding::Lost(task.state))
        }
    }

    /// Append a fresh claim marker if the claim made in `epoch` is still
    /// held. A lost claim is never refreshed.
    pub async fn refresh(&self, key: &TaskKey, epoch: u32) -> Result<Holding, StoreError> {
        let holding = self.check(key, epoch).await?;
        if holding == Holding::Held {
            self.store
                .append_note(key, &self.marker(epoch).to_note_body())
                .await?;
            debug!(worker_id = %self.worker_id, task = %key, "Refreshed claim marker");
        }
        Ok(holding)
    }

    fn marker(&self, epoch: u32) -> ClaimMarker {
        ClaimMarker::new(self.worker_id.clone(), self.clock.now()).with_epoch(epoch)
    }
}
