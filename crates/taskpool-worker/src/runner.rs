//! Worker run loop.
//!
//! Claim, execute, record, repeat. Claims are strictly sequential: the
//! worker never holds more than one task. The loop ends when the queue is
//! drained, when shutdown is requested (after the task in hand is
//! recorded), or when the store stays unreachable.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taskpool_core::{Clock, SystemClock, Task, TaskKey, TaskState};
use taskpool_store::{StoreError, TaskStore, TransitionOutcome};

use crate::claim::{ClaimOutcome, ClaimProtocol, Holding};
use crate::config::WorkerConfig;
use crate::engine::{EngineOutcome, EngineRequest, ExecutionEngine};
use crate::error::{EngineError, WorkerError};
use crate::status::StatusEmitter;

/// Exit code after draining the queue or stopping on request.
pub const EXIT_OK: i32 = 0;
/// Exit code for an unexpected worker error.
pub const EXIT_ERROR: i32 = 1;
/// Exit code after `max_store_failures` consecutive store outages.
pub const EXIT_STORE_UNAVAILABLE: i32 = 2;

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Drained,
    Stopped,
    StoreUnavailable,
}

impl WorkerExit {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Drained | Self::Stopped => EXIT_OK,
            Self::StoreUnavailable => EXIT_STORE_UNAVAILABLE,
        }
    }
}

/// How the engine phase of a task ended.
enum Execution {
    Finished(EngineOutcome),
    /// The claim was taken away mid-run; the engine was dropped.
    Lost(TaskState),
}

/// One worker process's main loop.
pub struct Worker {
    config: WorkerConfig,
    store: Arc<dyn TaskStore>,
    engine: Arc<dyn ExecutionEngine>,
    claims: ClaimProtocol,
    status: StatusEmitter,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn TaskStore>,
        engine: Arc<dyn ExecutionEngine>,
        status: StatusEmitter,
        shutdown: CancellationToken,
    ) -> Self {
        let claims = ClaimProtocol::new(
            store.clone(),
            Arc::new(SystemClock),
            config.team.clone(),
            config.worker_id.clone(),
        );
        Self {
            config,
            store,
            engine,
            claims,
            status,
            shutdown,
        }
    }

    /// Builder method to stamp claim markers with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.claims = ClaimProtocol::new(
            self.store.clone(),
            clock,
            self.config.team.clone(),
            self.config.worker_id.clone(),
        );
        self
    }

    /// Run until drained, stopped, or the store stays down.
    pub async fn run(&self) -> Result<WorkerExit, WorkerError> {
        let worker_id = &self.config.worker_id;
        info!(worker_id = %worker_id, team = %self.config.team, "Worker started");
        self.status.started()?;

        let mut store_failures = 0u32;
        loop {
            let round = self
                .pulse(None, self.claims.claim_next(&self.shutdown))
                .await?;
            match round {
                Ok(ClaimOutcome::Claimed(task)) => {
                    store_failures = 0;
                    self.status.claimed(&task.key)?;
                    self.work(task).await?;
                }
                Ok(ClaimOutcome::Drained) => {
                    info!(worker_id = %worker_id, "Queue drained");
                    self.status.drained()?;
                    return Ok(WorkerExit::Drained);
                }
                Ok(ClaimOutcome::Stopped) => {
                    info!(worker_id = %worker_id, "Stopping on request");
                    self.status.stopped()?;
                    return Ok(WorkerExit::Stopped);
                }
                Err(e) => {
                    store_failures += 1;
                    warn!(
                        worker_id = %worker_id,
                        failures = store_failures,
                        max = self.config.max_store_failures,
                        error = %e,
                        "Claim round failed"
                    );
                    self.status.store_unavailable(&e.to_string())?;

                    if store_failures >= self.config.max_store_failures {
                        error!(worker_id = %worker_id, "Store unavailable, giving up");
                        return Ok(WorkerExit::StoreUnavailable);
                    }

                    let delay = self.config.store_retry.delay(store_failures);
                    let pause = async {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    };
                    self.pulse(None, pause).await?;
                }
            }
        }
    }

    /// Drive `fut` to completion, heartbeating while it is pending.
    async fn pulse<F: Future>(
        &self,
        task: Option<&TaskKey>,
        fut: F,
    ) -> Result<F::Output, WorkerError> {
        tokio::pin!(fut);
        let every = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                output = &mut fut => return Ok(output),
                _ = heartbeat.tick() => self.status.heartbeat(task)?,
            }
        }
    }

    /// Execute a claimed task and record its outcome.
    async fn work(&self, task: Task) -> Result<(), WorkerError> {
        let epoch = task.claim_epoch();
        let request = EngineRequest::for_task(&task);
        match self.execute(&request, epoch).await? {
            Execution::Finished(outcome) => self.record(&task.key, epoch, outcome).await,
            Execution::Lost(actual) => {
                warn!(task = %task.key, actual = %actual, "Claim lost mid-run, engine stopped");
                self.status
                    .abandoned(&task.key, &format!("claim lost: task is {actual}"))
            }
        }
    }

    /// Run the engine under the task budget, keeping the claim alive.
    ///
    /// Each refresh re-checks the claim first; once it is gone the engine
    /// future is dropped, which kills a subprocess engine.
    async fn execute(&self, request: &EngineRequest, epoch: u32) -> Result<Execution, WorkerError> {
        let budget = self.config.task_timeout;
        let work = tokio::time::timeout(budget, self.engine.execute(request));
        tokio::pin!(work);

        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let refresh_every = self.config.claim_refresh_interval;
        let mut refresh = interval_at(Instant::now() + refresh_every, refresh_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut work => {
                    return Ok(Execution::Finished(match result {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => {
                            warn!(task = %request.task_id, error = %e, "Engine error");
                            EngineOutcome::failed(e.to_string())
                        }
                        Err(_) => {
                            warn!(task = %request.task_id, budget = ?budget, "Task timed out");
                            EngineOutcome::failed(EngineError::Timeout(budget).to_string())
                        }
                    }));
                }
                _ = heartbeat.tick() => {
                    self.status.heartbeat(Some(&request.task_id))?;
                }
                _ = refresh.tick() => {
                    match self.claims.refresh(&request.task_id, epoch).await {
                        Ok(Holding::Held) => {}
                        Ok(Holding::Lost(actual)) => return Ok(Execution::Lost(actual)),
                        Err(e) => {
                            warn!(task = %request.task_id, error = %e, "Claim refresh failed");
                        }
                    }
                }
            }
        }
    }

    /// Append the outcome note and move the task out of `InProgress`.
    async fn record(
        &self,
        key: &TaskKey,
        epoch: u32,
        outcome: EngineOutcome,
    ) -> Result<(), WorkerError> {
        let worker_id = &self.config.worker_id;
        let (note, target) = match &outcome {
            EngineOutcome::Completed { detail } if detail.is_empty() => {
                (format!("Completed by {worker_id}"), TaskState::Done)
            }
            EngineOutcome::Completed { detail } => {
                (format!("Completed by {worker_id}:\n{detail}"), TaskState::Done)
            }
            EngineOutcome::Failed { reason, detail } if detail.is_empty() => {
                (format!("Failed on {worker_id}: {reason}"), TaskState::Backlog)
            }
            EngineOutcome::Failed { reason, detail } => (
                format!("Failed on {worker_id}: {reason}\n{detail}"),
                TaskState::Backlog,
            ),
        };

        let finished = self
            .pulse(Some(key), self.finish(key, epoch, &note, target))
            .await?;
        match finished {
            Ok(TransitionOutcome::Applied(_)) => match outcome {
                EngineOutcome::Completed { detail } => {
                    info!(task = %key, "Task completed");
                    self.status.completed(key, &detail)
                }
                EngineOutcome::Failed { reason, .. } => {
                    info!(task = %key, reason = %reason, "Task failed, parked in backlog");
                    self.status.failed(key, &reason)
                }
            },
            Ok(TransitionOutcome::Conflict { actual }) => {
                warn!(task = %key, actual = %actual, "Claim lost before outcome was recorded");
                self.status
                    .abandoned(key, &format!("claim lost: task is {actual}"))
            }
            Err(e) => {
                warn!(task = %key, error = %e, "Could not record outcome");
                self.status.store_unavailable(&e.to_string())?;
                self.status
                    .abandoned(key, &format!("outcome not recorded: {e}"))
            }
        }
    }

    async fn finish(
        &self,
        key: &TaskKey,
        epoch: u32,
        note: &str,
        target: TaskState,
    ) -> Result<TransitionOutcome, StoreError> {
        // A reclaimed task may already be running elsewhere.
        if let Holding::Lost(actual) = self.claims.check(key, epoch).await? {
            return Ok(TransitionOutcome::Conflict { actual });
        }
        self.store.append_note(key, note).await?;
        self.store
            .transition(key, TaskState::InProgress, target)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use taskpool_core::{Note, Priority, ReclaimMarker, StatusEvent, WorkerId};
    use taskpool_store::MemoryStore;

    use super::*;
    use crate::status::CapturedLines;

    /// Engine driven by the task title.
    ///
    /// `ok` completes, `bad` fails, `slow` sleeps for a minute, `stop`
    /// requests shutdown then completes, `stolen` is reclaimed mid-run,
    /// `handed-off` is reclaimed and claimed by `run-w2` then keeps running.
    struct ScriptedEngine {
        shutdown: CancellationToken,
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl ExecutionEngine for ScriptedEngine {
        async fn execute(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError> {
            match request.title.as_str() {
                "bad" => Ok(EngineOutcome::Failed {
                    reason: "tests failed".to_string(),
                    detail: "3 failures".to_string(),
                }),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(EngineOutcome::Completed {
                        detail: String::new(),
                    })
                }
                "stolen" => {
                    let marker = ReclaimMarker::new(None, chrono::Utc::now(), true);
                    self.store
                        .append_note(&request.task_id, &marker.to_note_body())
                        .await
                        .unwrap();
                    self.store
                        .transition(&request.task_id, TaskState::InProgress, TaskState::Todo)
                        .await
                        .unwrap();
                    Ok(EngineOutcome::Completed {
                        detail: String::new(),
                    })
                }
                "handed-off" => {
                    let marker = ReclaimMarker::new(None, chrono::Utc::now(), true);
                    self.store
                        .append_note(&request.task_id, &marker.to_note_body())
                        .await
                        .unwrap();
                    self.store
                        .transition(&request.task_id, TaskState::InProgress, TaskState::Todo)
                        .await
                        .unwrap();
                    let other = ClaimProtocol::new(
                        self.store.clone(),
                        Arc::new(SystemClock),
                        "ENG",
                        WorkerId::new("run-w2"),
                    );
                    let claimed = other.claim_next(&CancellationToken::new()).await.unwrap();
                    assert!(matches!(claimed, ClaimOutcome::Claimed(_)));
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(EngineOutcome::Completed {
                        detail: String::new(),
                    })
                }
                "stop" => {
                    self.shutdown.cancel();
                    Ok(EngineOutcome::Completed {
                        detail: "finished anyway".to_string(),
                    })
                }
                _ => Ok(EngineOutcome::Completed {
                    detail: format!("did {}", request.task_id),
                }),
            }
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        capture: CapturedLines,
        worker: Worker,
        shutdown: CancellationToken,
    }

    fn harness(config: WorkerConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let capture = CapturedLines::new();
        let shutdown = CancellationToken::new();
        let worker = Worker::new(
            config.clone(),
            store.clone(),
            Arc::new(ScriptedEngine {
                shutdown: shutdown.clone(),
                store: store.clone(),
            }),
            StatusEmitter::to_writer(config.worker_id.clone(), capture.clone()),
            shutdown.clone(),
        );
        Harness {
            store,
            capture,
            worker,
            shutdown,
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            worker_id: WorkerId::new("run-w0"),
            team: "ENG".to_string(),
            ..WorkerConfig::default()
        }
    }

    fn events(capture: &CapturedLines) -> Vec<StatusEvent> {
        capture.lines().into_iter().map(|l| l.event).collect()
    }

    fn key(n: u64) -> TaskKey {
        TaskKey::new("ENG", n)
    }

    #[tokio::test]
    async fn test_drains_queue_and_marks_done() {
        let h = harness(config());
        h.store.insert(Task::new(key(1), "ok")).await;
        h.store
            .insert(Task::new(key(2), "ok").with_priority(Priority::Urgent))
            .await;

        let exit = h.worker.run().await.unwrap();

        assert_eq!(exit, WorkerExit::Drained);
        assert_eq!(exit.exit_code(), EXIT_OK);
        assert_eq!(
            events(&h.capture),
            vec![
                StatusEvent::Started,
                StatusEvent::Claimed,
                StatusEvent::Completed,
                StatusEvent::Claimed,
                StatusEvent::Completed,
                StatusEvent::Drained,
            ]
        );
        let lines = h.capture.lines();
        assert_eq!(lines[1].task_id, Some(key(2)));
        assert_eq!(lines[2].detail.as_deref(), Some("did ENG-2"));

        for n in [1, 2] {
            let task = h.store.snapshot(&key(n)).await.unwrap();
            assert_eq!(task.state, TaskState::Done);
            assert!(task.notes.iter().any(|n| n.body.starts_with("Completed by run-w0")));
        }
    }

    #[tokio::test]
    async fn test_failure_parks_task_in_backlog() {
        let h = harness(config());
        h.store.insert(Task::new(key(1), "bad")).await;

        assert_eq!(h.worker.run().await.unwrap(), WorkerExit::Drained);

        let failed = h
            .capture
            .lines()
            .into_iter()
            .find(|l| l.event == StatusEvent::Failed)
            .unwrap();
        assert_eq!(failed.detail.as_deref(), Some("tests failed"));

        let task = h.store.snapshot(&key(1)).await.unwrap();
        assert_eq!(task.state, TaskState::Backlog);
        assert!(task
            .notes
            .iter()
            .any(|n| n.body == "Failed on run-w0: tests failed\n3 failures"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_is_failure() {
        let h = harness(WorkerConfig {
            task_timeout: Duration::from_secs(5),
            ..config()
        });
        h.store.insert(Task::new(key(1), "slow")).await;

        h.worker.run().await.unwrap();

        let failed = h
            .capture
            .lines()
            .into_iter()
            .find(|l| l.event == StatusEvent::Failed)
            .unwrap();
        assert_eq!(failed.detail.as_deref(), Some("timed out after 5s"));
        assert_eq!(h.store.snapshot(&key(1)).await.unwrap().state, TaskState::Backlog);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_task_heartbeats_and_refreshes_claim() {
        let h = harness(WorkerConfig {
            heartbeat_interval: Duration::from_secs(10),
            claim_refresh_interval: Duration::from_secs(25),
            ..config()
        });
        h.store.insert(Task::new(key(1), "slow")).await;

        h.worker.run().await.unwrap();

        let heartbeats = h
            .capture
            .lines()
            .into_iter()
            .filter(|l| l.event == StatusEvent::Heartbeat)
            .inspect(|l| assert_eq!(l.task_id, Some(key(1))))
            .count();
        assert!(heartbeats >= 5, "only {heartbeats} heartbeats");

        let task = h.store.snapshot(&key(1)).await.unwrap();
        let markers = task.notes.iter().filter(|n| n.claim_marker().is_some()).count();
        assert!(markers >= 3, "only {markers} claim markers");
        assert_eq!(task.state, TaskState::Done);
    }

    #[tokio::test]
    async fn test_shutdown_mid_task_finishes_then_stops() {
        let h = harness(config());
        h.store
            .insert(Task::new(key(1), "stop").with_priority(Priority::Urgent))
            .await;
        h.store.insert(Task::new(key(2), "ok")).await;

        let exit = h.worker.run().await.unwrap();

        assert_eq!(exit, WorkerExit::Stopped);
        assert_eq!(
            events(&h.capture),
            vec![
                StatusEvent::Started,
                StatusEvent::Claimed,
                StatusEvent::Completed,
                StatusEvent::Stopped,
            ]
        );
        assert_eq!(h.store.snapshot(&key(1)).await.unwrap().state, TaskState::Done);
        assert_eq!(h.store.snapshot(&key(2)).await.unwrap().state, TaskState::Todo);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_claims_nothing() {
        let h = harness(config());
        h.store.insert(Task::new(key(1), "ok")).await;
        h.shutdown.cancel();

        assert_eq!(h.worker.run().await.unwrap(), WorkerExit::Stopped);
        assert!(h.store.history().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_outage_exits_with_store_code() {
        let h = harness(WorkerConfig {
            max_store_failures: 3,
            ..config()
        });
        h.store.insert(Task::new(key(1), "ok")).await;
        h.store.fail_next(100);

        let exit = h.worker.run().await.unwrap();

        assert_eq!(exit, WorkerExit::StoreUnavailable);
        assert_eq!(exit.exit_code(), EXIT_STORE_UNAVAILABLE);
        let outages = events(&h.capture)
            .into_iter()
            .filter(|e| *e == StatusEvent::StoreUnavailable)
            .count();
        assert_eq!(outages, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_recovers_and_resets_counter() {
        let h = harness(WorkerConfig {
            max_store_failures: 2,
            ..config()
        });
        h.store.insert(Task::new(key(1), "ok")).await;
        h.store.fail_next(1);

        assert_eq!(h.worker.run().await.unwrap(), WorkerExit::Drained);
        assert_eq!(h.store.snapshot(&key(1)).await.unwrap().state, TaskState::Done);
    }

    #[tokio::test]
    async fn test_reclaimed_task_is_abandoned_not_completed() {
        let h = harness(config());
        h.store.insert(Task::new(key(1), "stolen")).await;

        // Run one claim and its outcome by hand: the reclaimed task is back
        // in Todo, so a full run would pick it up again.
        let ClaimOutcome::Claimed(task) = h
            .worker
            .claims
            .claim_next(&CancellationToken::new())
            .await
            .unwrap()
        else {
            panic!("expected a claim");
        };
        h.worker.work(task).await.unwrap();

        let lines = h.capture.lines();
        assert!(!lines.iter().any(|l| l.event == StatusEvent::Failed));
        let abandoned = lines
            .iter()
            .find(|l| l.event == StatusEvent::Abandoned)
            .unwrap();
        assert_eq!(abandoned.task_id, Some(key(1)));
        assert_eq!(abandoned.detail.as_deref(), Some("claim lost: task is todo"));
        let task = h.store.snapshot(&key(1)).await.unwrap();
        assert_eq!(task.state, TaskState::Todo);
        assert!(!task.notes.iter().any(|n| n.body.starts_with("Completed by")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_claimed_elsewhere_after_reclaim_is_left_alone() {
        let h = harness(WorkerConfig {
            claim_refresh_interval: Duration::from_secs(10),
            ..config()
        });
        h.store.insert(Task::new(key(1), "handed-off")).await;
        let started = Instant::now();

        assert_eq!(h.worker.run().await.unwrap(), WorkerExit::Drained);

        // The engine was dropped at the first refresh, not run to the end.
        assert!(started.elapsed() < Duration::from_secs(60));

        let task = h.store.snapshot(&key(1)).await.unwrap();
        assert_eq!(task.state, TaskState::InProgress);
        assert!(task.held_by(&WorkerId::new("run-w2")));
        assert!(!task.held_by(&WorkerId::new("run-w0")));
        assert_eq!(
            task.latest_claim().map(|m| m.worker_id),
            Some(WorkerId::new("run-w2"))
        );

        let boundary = task
            .notes
            .iter()
            .position(|n| n.reclaim_marker().is_some())
            .unwrap();
        assert!(!task.notes[boundary..].iter().any(|n| n
            .claim_marker()
            .is_some_and(|m| m.worker_id == WorkerId::new("run-w0"))));
        assert!(!task.notes.iter().any(|n| n.body.starts_with("Completed by")));

        let abandoned = h
            .capture
            .lines()
            .into_iter()
            .find(|l| l.event == StatusEvent::Abandoned)
            .unwrap();
        assert_eq!(abandoned.task_id, Some(key(1)));
        assert!(abandoned
            .detail
            .as_deref()
            .is_some_and(|d| d.starts_with("claim lost")));
    }

    /// Store whose reads take `delay`.
    struct SlowReads {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl TaskStore for SlowReads {
        async fn list_by_state(&self, team: &str, state: TaskState) -> Result<Vec<Task>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_by_state(team, state).await
        }

        async fn get_task(&self, key: &TaskKey) -> Result<Task, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_task(key).await
        }

        async fn transition(
            &self,
            key: &TaskKey,
            from: TaskState,
            to: TaskState,
        ) -> Result<TransitionOutcome, StoreError> {
            self.inner.transition(key, from, to).await
        }

        async fn append_note(&self, key: &TaskKey, body: &str) -> Result<Note, StoreError> {
            self.inner.append_note(key, body).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_continue_while_store_is_slow() {
        let inner = Arc::new(MemoryStore::new());
        inner.insert(Task::new(key(1), "ok")).await;
        let capture = CapturedLines::new();
        let shutdown = CancellationToken::new();
        let config = WorkerConfig {
            heartbeat_interval: Duration::from_secs(10),
            ..config()
        };
        let worker = Worker::new(
            config.clone(),
            Arc::new(SlowReads {
                inner: inner.clone(),
                delay: Duration::from_secs(45),
            }),
            Arc::new(ScriptedEngine {
                shutdown: shutdown.clone(),
                store: inner.clone(),
            }),
            StatusEmitter::to_writer(config.worker_id.clone(), capture.clone()),
            shutdown,
        );

        assert_eq!(worker.run().await.unwrap(), WorkerExit::Drained);

        let lines = capture.lines();
        let claimed = lines
            .iter()
            .position(|l| l.event == StatusEvent::Claimed)
            .unwrap();
        let completed = lines
            .iter()
            .position(|l| l.event == StatusEvent::Completed)
            .unwrap();

        // Listing candidates.
        let while_claiming = lines[..claimed]
            .iter()
            .filter(|l| l.event == StatusEvent::Heartbeat && l.task_id.is_none())
            .count();
        assert!(while_claiming >= 4, "only {while_claiming} heartbeats");

        // Checking the claim before recording.
        let while_recording = lines[claimed..completed]
            .iter()
            .filter(|l| l.event == StatusEvent::Heartbeat && l.task_id == Some(key(1)))
            .count();
        assert!(while_recording >= 4, "only {while_recording} heartbeats");
        assert_eq!(inner.snapshot(&key(1)).await.unwrap().state, TaskState::Done);
    }
}
