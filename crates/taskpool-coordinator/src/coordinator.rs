//! The coordinator: owns the worker slots for one run.
//!
//! All slots report over one channel, so the main loop is a single
//! `select!` over "next slot event" and "shutdown requested". The
//! coordinator never talks to the store about claims; what it knows about
//! tasks comes from the workers' status lines.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskpool_core::{
    Clock, EndReason, RunSummary, SlotId, SlotOutcome, SlotReport, StatusEvent, SystemClock,
    TaskKey, TeamRunConfig, WorkerId, WorkerState,
};

use crate::config::SupervisorConfig;
use crate::error::CoordinatorError;
use crate::sink::SummarySink;
use crate::staleness::{StalenessDetector, StalenessTotals};
use crate::supervisor::{SlotEvent, WorkerProcess};

/// The coordinator's view of one slot.
///
/// The OS process itself belongs to the slot's supervisor task; this
/// mirror is rebuilt from the events it sends.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerDescriptor {
    pub slot: SlotId,
    pub worker_id: WorkerId,
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    /// Time of the last status line.
    pub last_seen_at: Option<DateTime<Utc>>,
    pub current_task: Option<TaskKey>,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub last_error: Option<String>,
    pub outcome: Option<SlotOutcome>,
}

impl WorkerDescriptor {
    pub fn new(slot: SlotId, worker_id: WorkerId) -> Self {
        Self {
            slot,
            worker_id,
            state: WorkerState::Spawning,
            pid: None,
            restart_count: 0,
            last_seen_at: None,
            current_task: None,
            tasks_completed: 0,
            tasks_failed: 0,
            last_error: None,
            outcome: None,
        }
    }

    /// Whether the slot will never run another process.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Fold one event into the mirror.
    pub fn apply(&mut self, event: &SlotEvent, now: DateTime<Utc>) {
        match event {
            SlotEvent::Spawned { pid, .. } => {
                self.state = WorkerState::Spawning;
                self.pid = *pid;
                self.current_task = None;
            }
            SlotEvent::Line { line, .. } => {
                self.last_seen_at = Some(now);
                if self.state == WorkerState::Spawning {
                    self.state = WorkerState::Running;
                }
                match line.event {
                    StatusEvent::Claimed | StatusEvent::Heartbeat => {
                        self.current_task = line.task_id.clone();
                    }
                    StatusEvent::Completed => {
                        self.tasks_completed += 1;
                        self.current_task = None;
                    }
                    StatusEvent::Failed => {
                        self.tasks_failed += 1;
                        self.current_task = None;
                    }
                    StatusEvent::Abandoned | StatusEvent::Drained | StatusEvent::Stopped => {
                        self.current_task = None;
                    }
                    StatusEvent::Started | StatusEvent::StoreUnavailable => {}
                }
            }
            SlotEvent::Crashed { reason, .. } => {
                self.state = WorkerState::Crashed;
                self.pid = None;
                self.current_task = None;
                self.last_error = Some(reason.clone());
            }
            SlotEvent::Restarting { restarts, .. } => {
                self.state = WorkerState::Restarting;
                self.restart_count = *restarts;
            }
            SlotEvent::Finished {
                outcome,
                exit_code,
                restarts,
                last_error,
                ..
            } => {
                self.state = match outcome {
                    SlotOutcome::Retired => WorkerState::Retired,
                    _ => WorkerState::Exited(exit_code.unwrap_or(-1)),
                };
                self.pid = None;
                self.current_task = None;
                self.restart_count = *restarts;
                self.last_error = last_error.clone();
                self.outcome = Some(*outcome);
            }
        }
    }

    pub fn report(&self) -> SlotReport {
        SlotReport {
            slot: self.slot,
            worker_id: self.worker_id.clone(),
            outcome: self.outcome.unwrap_or(SlotOutcome::Stopped),
            restarts: self.restart_count,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            last_error: self.last_error.clone(),
        }
    }
}

/// Drives one team run to completion.
pub struct Coordinator {
    run: TeamRunConfig,
    supervisor: Arc<SupervisorConfig>,
    run_tag: String,
    detector: Option<StalenessDetector>,
    sinks: Vec<Box<dyn SummarySink>>,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(run: TeamRunConfig, supervisor: SupervisorConfig) -> Self {
        let run_tag = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            run,
            supervisor: Arc::new(supervisor),
            run_tag,
            detector: None,
            sinks: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Builder method to set the tag worker ids are derived from.
    pub fn with_run_tag(mut self, tag: impl Into<String>) -> Self {
        self.run_tag = tag.into();
        self
    }

    /// Builder method to run a staleness detector alongside the workers.
    pub fn with_detector(mut self, detector: StalenessDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Builder method to add a summary sink.
    pub fn with_sink(mut self, sink: Box<dyn SummarySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Builder method to timestamp the summary and descriptors with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn run_tag(&self) -> &str {
        &self.run_tag
    }

    /// Run until every slot is finished.
    ///
    /// Ends when all workers drained or retired, when `max_tasks` outcomes
    /// have been reported, or when `shutdown` is cancelled. In the last two
    /// cases workers are asked to stop and given the grace period to finish
    /// the task in hand.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<RunSummary, CoordinatorError> {
        self.run.validate()?;

        let started_at = self.clock.now();
        let started = Instant::now();
        info!(
            team = %self.run.team,
            run_tag = %self.run_tag,
            workers = self.run.worker_count,
            max_tasks = ?self.run.max_tasks,
            restart_budget = self.run.restart_budget,
            "Starting run"
        );

        let refresh = self
            .detector
            .as_ref()
            .map(|d| d.config().worker_refresh());

        let (tx, mut rx) = mpsc::channel(256);
        let stop = shutdown.child_token();
        let mut slots: BTreeMap<SlotId, WorkerDescriptor> = BTreeMap::new();
        let mut handles = Vec::new();

        for n in 0..self.run.worker_count {
            let slot = SlotId(n);
            let worker_id = WorkerId::for_slot(&self.run_tag, slot);
            let mut process = WorkerProcess::new(
                slot,
                worker_id.clone(),
                &self.run,
                self.supervisor.clone(),
                tx.clone(),
                stop.clone(),
            );
            if let Some(refresh) = refresh {
                process =
                    process.with_env("TASKPOOL_CLAIM_REFRESH_SECS", refresh.as_secs().to_string());
            }
            handles.push(process.spawn());
            slots.insert(slot, WorkerDescriptor::new(slot, worker_id));
        }
        drop(tx);

        let detector_stop = CancellationToken::new();
        let detector = self.detector.take().map(|detector| {
            let cancel = detector_stop.clone();
            tokio::spawn(async move { detector.run(cancel).await })
        });

        let mut end_reason: Option<EndReason> = None;
        let mut tasks_completed = 0u32;
        let mut tasks_failed = 0u32;
        let mut tasks_abandoned = 0u32;
        let mut store_failures = 0u32;

        loop {
            tokio::select! {
                _ = stop.cancelled(), if end_reason.is_none() => {
                    info!(team = %self.run.team, "Shutdown requested, stopping workers");
                    end_reason = Some(EndReason::Shutdown);
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };

                    if let SlotEvent::Line { slot, line } = &event {
                        debug!(slot = slot.0, event = ?line.event, task = ?line.task_id, "Status line");
                        match line.event {
                            StatusEvent::Completed => tasks_completed += 1,
                            StatusEvent::Failed => tasks_failed += 1,
                            StatusEvent::Abandoned => tasks_abandoned += 1,
                            StatusEvent::StoreUnavailable => store_failures += 1,
                            _ => {}
                        }
                    }
                    if let Some(descriptor) = slots.get_mut(&event.slot()) {
                        descriptor.apply(&event, self.clock.now());
                    }

                    if let Some(max) = self.run.max_tasks {
                        if end_reason.is_none() && tasks_completed + tasks_failed >= max {
                            info!(team = %self.run.team, max, "Task budget reached, stopping workers");
                            end_reason = Some(EndReason::TaskBudget);
                            stop.cancel();
                        }
                    }

                    if slots.values().all(WorkerDescriptor::is_finished) {
                        break;
                    }
                }
            }
        }

        detector_stop.cancel();
        let totals = match detector {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "Staleness detector task failed");
                StalenessTotals::default()
            }),
            None => StalenessTotals::default(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Slot supervisor task failed");
            }
        }

        let reports: Vec<SlotReport> = slots.values().map(WorkerDescriptor::report).collect();
        let summary = RunSummary {
            team: self.run.team.clone(),
            tasks_completed,
            tasks_failed,
            tasks_abandoned,
            slots_retired: reports
                .iter()
                .filter(|r| r.outcome == SlotOutcome::Retired)
                .count() as u32,
            duration: started.elapsed(),
            started_at,
            finished_at: self.clock.now(),
            end_reason: end_reason.unwrap_or(EndReason::Drained),
            slots: reports,
            stale_flagged: totals.flagged,
            stale_reclaimed: totals.reclaimed,
            store_failures: store_failures + totals.failed_sweeps,
        };

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&summary).await {
                warn!(sink = sink.name(), error = %e, "Summary delivery failed");
            }
        }

        Ok(summary)
    }
}
