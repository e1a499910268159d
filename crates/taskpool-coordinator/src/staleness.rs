//! Stale claim detection.
//!
//! A claim is stale when its most recent claim marker is older than the
//! threshold. Workers refresh the marker while they execute, so only a dead
//! or wedged holder lets it age. The detector never trusts its listing:
//! every candidate is re-read right before acting, and a task that left
//! `InProgress` or got a fresh marker in the meantime is left alone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskpool_core::{BackoffPolicy, Clock, ReclaimMarker, Task, TaskKey, TaskState, WorkerId};
use taskpool_store::{StoreError, TaskStore, TransitionOutcome};

use crate::config::{ReclaimNotes, StalePolicy, StalenessConfig};

/// What the detector did with a stale task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleAction {
    Flagged,
    Reclaimed,
}

/// A stale claim found by a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleTask {
    pub key: TaskKey,
    /// Holder named by the latest claim marker, if there is one.
    pub holder: Option<WorkerId>,
    /// When the claim was last refreshed.
    pub since: DateTime<Utc>,
    pub action: StaleAction,
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// `InProgress` tasks examined.
    pub checked: usize,
    pub stale: Vec<StaleTask>,
    /// Looked stale in the listing but changed before we acted.
    pub skipped: usize,
}

impl SweepReport {
    pub fn flagged(&self) -> usize {
        self.count(StaleAction::Flagged)
    }

    pub fn reclaimed(&self) -> usize {
        self.count(StaleAction::Reclaimed)
    }

    fn count(&self, action: StaleAction) -> usize {
        self.stale.iter().filter(|s| s.action == action).count()
    }
}

/// Running totals over a detector's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StalenessTotals {
    pub sweeps: u32,
    pub flagged: u32,
    pub reclaimed: u32,
    pub failed_sweeps: u32,
}

/// Periodic sweep for abandoned claims on one team's queue.
pub struct StalenessDetector {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    team: String,
    config: StalenessConfig,
    backoff: BackoffPolicy,
}

impl StalenessDetector {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        team: impl Into<String>,
        config: StalenessConfig,
    ) -> Self {
        Self {
            store,
            clock,
            team: team.into(),
            config,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn config(&self) -> &StalenessConfig {
        &self.config
    }

    /// When the task's claim was last refreshed.
    ///
    /// Falls back to the last update for tasks that reached `InProgress`
    /// without a marker.
    fn claimed_since(task: &Task) -> DateTime<Utc> {
        task.latest_claim()
            .map(|m| m.claimed_at)
            .unwrap_or(task.updated_at)
    }

    fn is_stale(&self, task: &Task, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(Self::claimed_since(task));
        match elapsed.to_std() {
            Ok(elapsed) => elapsed > self.config.threshold,
            // Marker in the future: clock skew, not staleness.
            Err(_) => false,
        }
    }

    /// Run one sweep.
    ///
    /// Fails only if the listing fails; per-task errors are logged and the
    /// task is skipped until the next sweep.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let tasks = self
            .store
            .list_by_state(&self.team, TaskState::InProgress)
            .await?;

        let mut report = SweepReport {
            checked: tasks.len(),
            ..SweepReport::default()
        };

        for listed in tasks.iter().filter(|t| self.is_stale(t, now)) {
            let current = match self.store.get_task(&listed.key).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(task = %listed.key, error = %e, "Re-check failed, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            if current.state != TaskState::InProgress || !self.is_stale(&current, self.clock.now()) {
                debug!(task = %current.key, state = %current.state, "Task moved on before re-check");
                report.skipped += 1;
                continue;
            }

            let holder = current.latest_claim().map(|m| m.worker_id);
            let since = Self::claimed_since(&current);

            let action = match self.config.policy {
                StalePolicy::Flag => {
                    warn!(
                        task = %current.key,
                        holder = ?holder.as_ref().map(WorkerId::as_str),
                        since = %since,
                        "Stale claim"
                    );
                    StaleAction::Flagged
                }
                StalePolicy::Reclaim => match self.reclaim(&current, holder.clone()).await {
                    Ok(true) => StaleAction::Reclaimed,
                    Ok(false) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(task = %current.key, error = %e, "Reclaim failed, skipping");
                        report.skipped += 1;
                        continue;
                    }
                },
            };

            report.stale.push(StaleTask {
                key: current.key.clone(),
                holder,
                since,
                action,
            });
        }

        info!(
            team = %self.team,
            checked = report.checked,
            flagged = report.flagged(),
            reclaimed = report.reclaimed(),
            skipped = report.skipped,
            "Staleness sweep finished"
        );
        Ok(report)
    }

    /// Write the reclaim boundary, then hand the task back to `Todo`.
    ///
    /// Returns false if the task left `InProgress` first.
    async fn reclaim(&self, task: &Task, holder: Option<WorkerId>) -> Result<bool, StoreError> {
        let carry = self.config.notes == ReclaimNotes::Carry;
        let marker = ReclaimMarker::new(holder, self.clock.now(), carry);
        self.store
            .append_note(&task.key, &marker.to_note_body())
            .await?;

        match self
            .store
            .transition(&task.key, TaskState::InProgress, TaskState::Todo)
            .await?
        {
            TransitionOutcome::Applied(_) => {
                info!(task = %task.key, carry_notes = carry, "Reclaimed stale task");
                Ok(true)
            }
            TransitionOutcome::Conflict { actual } => {
                debug!(task = %task.key, actual = %actual, "Task moved on during reclaim");
                Ok(false)
            }
        }
    }

    /// Sweep every `sweep_interval` until `cancel` fires.
    ///
    /// Cancellation is immediate, even mid-sweep. After a failed sweep the
    /// next one is delayed by an extra backoff that grows with consecutive
    /// failures.
    pub async fn run(&self, cancel: CancellationToken) -> StalenessTotals {
        let mut totals = StalenessTotals::default();
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sweep() => result,
            };
            totals.sweeps += 1;

            match result {
                Ok(report) => {
                    consecutive_failures = 0;
                    totals.flagged += report.flagged() as u32;
                    totals.reclaimed += report.reclaimed() as u32;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    totals.failed_sweeps += 1;
                    let delay = self.backoff.delay(consecutive_failures);
                    warn!(
                        team = %self.team,
                        failures = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Staleness sweep failed"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        debug!(team = %self.team, sweeps = totals.sweeps, "Staleness detector stopped");
        totals
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use taskpool_core::{ClaimMarker, ManualClock, Note};
    use taskpool_store::MemoryStore;

    use super::*;

    const THRESHOLD: u64 = 600;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn key() -> TaskKey {
        TaskKey::new("ENG", 1)
    }

    fn config(policy: StalePolicy, notes: ReclaimNotes) -> StalenessConfig {
        StalenessConfig {
            threshold: Duration::from_secs(THRESHOLD),
            sweep_interval: Duration::from_secs(30),
            policy,
            notes,
        }
    }

    /// Store holding one task claimed by `w1` at T0.
    async fn claimed_store(clock: Arc<ManualClock>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::with_clock(clock));
        store.insert(Task::new(key(), "t")).await;
        store.append_note(&key(), "partial progress").await.unwrap();
        store
            .append_note(
                &key(),
                &ClaimMarker::new(WorkerId::new("w1"), t0()).to_note_body(),
            )
            .await
            .unwrap();
        store
            .transition(&key(), TaskState::Todo, TaskState::InProgress)
            .await
            .unwrap();
        store
    }

    fn detector(
        store: Arc<dyn TaskStore>,
        clock: Arc<ManualClock>,
        policy: StalePolicy,
        notes: ReclaimNotes,
    ) -> StalenessDetector {
        StalenessDetector::new(store, clock, "ENG", config(policy, notes))
    }

    #[tokio::test]
    async fn test_not_flagged_just_inside_threshold() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let detector = detector(store, clock.clone(), StalePolicy::Flag, ReclaimNotes::Carry);

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 - 1));
        let report = detector.sweep().await.unwrap();

        assert_eq!(report.checked, 1);
        assert!(report.stale.is_empty());
    }

    #[tokio::test]
    async fn test_exact_threshold_is_not_stale() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let detector = detector(store, clock.clone(), StalePolicy::Flag, ReclaimNotes::Carry);

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64));
        assert!(detector.sweep().await.unwrap().stale.is_empty());
    }

    #[tokio::test]
    async fn test_flagged_just_past_threshold() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let detector = detector(
            store.clone(),
            clock.clone(),
            StalePolicy::Flag,
            ReclaimNotes::Carry,
        );

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        let report = detector.sweep().await.unwrap();

        assert_eq!(report.flagged(), 1);
        assert_eq!(report.stale[0].holder, Some(WorkerId::new("w1")));
        assert_eq!(report.stale[0].since, t0());
        // Flagging leaves the task alone.
        assert_eq!(
            store.snapshot(&key()).await.unwrap().state,
            TaskState::InProgress
        );
    }

    #[tokio::test]
    async fn test_refreshed_marker_resets_the_clock() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        store
            .append_note(
                &key(),
                &ClaimMarker::new(WorkerId::new("w1"), t0() + chrono::Duration::seconds(300))
                    .to_note_body(),
            )
            .await
            .unwrap();
        let detector = detector(store, clock.clone(), StalePolicy::Flag, ReclaimNotes::Carry);

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        assert!(detector.sweep().await.unwrap().stale.is_empty());
    }

    /// Changes the task between the listing and the detector's next call.
    #[derive(Clone, Copy)]
    enum Interference {
        CompleteOnRecheck,
        RefreshOnRecheck,
        CompleteOnReclaim,
    }

    struct Racing {
        inner: Arc<MemoryStore>,
        interference: Interference,
    }

    #[async_trait]
    impl TaskStore for Racing {
        async fn list_by_state(&self, team: &str, state: TaskState) -> Result<Vec<Task>, StoreError> {
            self.inner.list_by_state(team, state).await
        }

        async fn get_task(&self, key: &TaskKey) -> Result<Task, StoreError> {
            match self.interference {
                Interference::CompleteOnRecheck => {
                    self.inner
                        .transition(key, TaskState::InProgress, TaskState::Done)
                        .await?;
                }
                Interference::RefreshOnRecheck => {
                    let fresh = ClaimMarker::new(
                        WorkerId::new("w1"),
                        t0() + chrono::Duration::seconds(THRESHOLD as i64),
                    );
                    self.inner.append_note(key, &fresh.to_note_body()).await?;
                }
                Interference::CompleteOnReclaim => {}
            }
            self.inner.get_task(key).await
        }

        async fn transition(
            &self,
            key: &TaskKey,
            from: TaskState,
            to: TaskState,
        ) -> Result<TransitionOutcome, StoreError> {
            if let Interference::CompleteOnReclaim = self.interference {
                self.inner
                    .transition(key, TaskState::InProgress, TaskState::Done)
                    .await?;
            }
            self.inner.transition(key, from, to).await
        }

        async fn append_note(&self, key: &TaskKey, body: &str) -> Result<Note, StoreError> {
            self.inner.append_note(key, body).await
        }
    }

    #[tokio::test]
    async fn test_task_completed_before_recheck_is_never_flagged() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let racing = Arc::new(Racing {
            inner: store.clone(),
            interference: Interference::CompleteOnRecheck,
        });
        let detector = detector(racing, clock.clone(), StalePolicy::Reclaim, ReclaimNotes::Carry);

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        let report = detector.sweep().await.unwrap();

        assert!(report.stale.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(store.snapshot(&key()).await.unwrap().state, TaskState::Done);
    }

    #[tokio::test]
    async fn test_marker_refreshed_before_recheck_is_skipped() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let racing = Arc::new(Racing {
            inner: store.clone(),
            interference: Interference::RefreshOnRecheck,
        });
        let detector = detector(racing, clock.clone(), StalePolicy::Reclaim, ReclaimNotes::Carry);

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        let report = detector.sweep().await.unwrap();

        assert!(report.stale.is_empty());
        assert_eq!(
            store.snapshot(&key()).await.unwrap().state,
            TaskState::InProgress
        );
    }

    #[tokio::test]
    async fn test_reclaim_conflict_is_skipped() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let racing = Arc::new(Racing {
            inner: store.clone(),
            interference: Interference::CompleteOnReclaim,
        });
        let detector = detector(racing, clock.clone(), StalePolicy::Reclaim, ReclaimNotes::Carry);

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        let report = detector.sweep().await.unwrap();

        assert_eq!(report.reclaimed(), 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.snapshot(&key()).await.unwrap().state, TaskState::Done);
    }

    #[tokio::test]
    async fn test_reclaim_carry_keeps_prior_notes_visible() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let detector = detector(
            store.clone(),
            clock.clone(),
            StalePolicy::Reclaim,
            ReclaimNotes::Carry,
        );

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        let report = detector.sweep().await.unwrap();
        assert_eq!(report.reclaimed(), 1);

        let task = store.snapshot(&key()).await.unwrap();
        assert_eq!(task.state, TaskState::Todo);
        let visible: Vec<&str> = task
            .notes_for_execution()
            .iter()
            .map(|n| n.body.as_str())
            .collect();
        assert_eq!(visible, vec!["partial progress"]);
    }

    #[tokio::test]
    async fn test_reclaim_fresh_hides_prior_notes_without_deleting() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        let detector = detector(
            store.clone(),
            clock.clone(),
            StalePolicy::Reclaim,
            ReclaimNotes::Fresh,
        );

        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        detector.sweep().await.unwrap();

        let task = store.snapshot(&key()).await.unwrap();
        assert_eq!(task.state, TaskState::Todo);
        assert!(task.notes_for_execution().is_empty());
        assert!(task.notes.iter().any(|n| n.body == "partial progress"));

        let boundary = task.notes.last().unwrap().reclaim_marker().unwrap();
        assert_eq!(boundary.previous_worker, Some(WorkerId::new("w1")));
        assert!(!boundary.carry_notes);
        assert!(!task.held_by(&WorkerId::new("w1")));
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_sweep() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        store.fail_next(1);
        let detector = detector(store, clock, StalePolicy::Flag, ReclaimNotes::Carry);

        assert!(detector.sweep().await.unwrap_err().is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_on_interval_and_stops_on_cancel() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = claimed_store(clock.clone()).await;
        clock.set(t0() + chrono::Duration::seconds(THRESHOLD as i64 + 1));
        let detector = Arc::new(detector(
            store,
            clock,
            StalePolicy::Flag,
            ReclaimNotes::Carry,
        ));

        let cancel = CancellationToken::new();
        let handle = {
            let detector = detector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { detector.run(cancel).await })
        };

        // Ticks at 0s, 30s and 60s.
        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();
        let totals = handle.await.unwrap();

        assert_eq!(totals.sweeps, 3);
        assert_eq!(totals.flagged, 3);
        assert_eq!(totals.failed_sweeps, 0);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_cancelled() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let detector = detector(store, clock, StalePolicy::Flag, ReclaimNotes::Carry);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let totals = tokio::time::timeout(Duration::from_secs(1), detector.run(cancel))
            .await
            .unwrap();
        assert_eq!(totals, StalenessTotals::default());
    }
}
