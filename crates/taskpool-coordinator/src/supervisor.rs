//! Worker process supervision.
//!
//! Each slot runs as its own tokio task that owns the OS process, reads its
//! status stream line by line and applies the restart policy. Everything
//! the coordinator needs to know is forwarded as a [`SlotEvent`] on a
//! channel shared by all slots, so one slow or dead worker never blocks the
//! others.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskpool_core::{
    SlotId, SlotOutcome, StatusEvent, StatusLine, TeamRunConfig, WorkerCommand, WorkerId,
};

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;

/// Something that happened to a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotEvent {
    /// A process was launched for the slot.
    Spawned {
        slot: SlotId,
        pid: Option<u32>,
        attempt: u32,
    },
    /// The process wrote a status line.
    Line { slot: SlotId, line: StatusLine },
    /// The process crashed, hung or could not be started.
    Crashed { slot: SlotId, reason: String },
    /// A restart is scheduled after `delay`.
    Restarting {
        slot: SlotId,
        restarts: u32,
        delay: Duration,
    },
    /// The slot reached a terminal state and will not spawn again.
    Finished {
        slot: SlotId,
        outcome: SlotOutcome,
        exit_code: Option<i32>,
        restarts: u32,
        last_error: Option<String>,
    },
}

impl SlotEvent {
    pub fn slot(&self) -> SlotId {
        match self {
            Self::Spawned { slot, .. }
            | Self::Line { slot, .. }
            | Self::Crashed { slot, .. }
            | Self::Restarting { slot, .. }
            | Self::Finished { slot, .. } => *slot,
        }
    }
}

/// How one process ended without counting as a crash.
#[derive(Debug)]
enum ProcessEnd {
    /// Exit code 0. `stopped` is true if the worker said it stopped on request.
    Exited { stopped: bool },
    /// Killed after the grace period ran out during shutdown.
    Terminated,
}

/// Supervisor for one worker slot.
pub struct WorkerProcess {
    slot: SlotId,
    worker_id: WorkerId,
    team: String,
    task_timeout: Duration,
    restart_budget: u32,
    config: Arc<SupervisorConfig>,
    env: Vec<(String, String)>,
    events: mpsc::Sender<SlotEvent>,
    stop: CancellationToken,
}

impl WorkerProcess {
    pub fn new(
        slot: SlotId,
        worker_id: WorkerId,
        run: &TeamRunConfig,
        config: Arc<SupervisorConfig>,
        events: mpsc::Sender<SlotEvent>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            slot,
            worker_id,
            team: run.team.clone(),
            task_timeout: run.task_timeout,
            restart_budget: run.restart_budget,
            config,
            env: Vec::new(),
            events,
            stop,
        }
    }

    /// Builder method to add an environment variable for this slot's workers.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Start supervising on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.supervise())
    }

    async fn supervise(self) {
        let mut restarts = 0u32;
        let mut last_error: Option<String> = None;
        let mut last_exit: Option<i32> = None;

        loop {
            if self.stop.is_cancelled() {
                self.finish(SlotOutcome::Stopped, last_exit, restarts, last_error)
                    .await;
                return;
            }

            match self.run_process(restarts + 1).await {
                Ok(ProcessEnd::Exited { stopped }) => {
                    let outcome = if stopped || self.stop.is_cancelled() {
                        SlotOutcome::Stopped
                    } else {
                        SlotOutcome::Drained
                    };
                    info!(slot = self.slot.0, worker_id = %self.worker_id, ?outcome, "Worker exited");
                    self.finish(outcome, Some(0), restarts, last_error).await;
                    return;
                }
                Ok(ProcessEnd::Terminated) => {
                    self.finish(SlotOutcome::Stopped, None, restarts, last_error)
                        .await;
                    return;
                }
                Err(err) => {
                    let reason = err.to_string();
                    if let SupervisorError::Exit(code) = err {
                        last_exit = Some(code);
                    }
                    warn!(
                        slot = self.slot.0,
                        worker_id = %self.worker_id,
                        restarts,
                        reason = %reason,
                        "Worker crashed"
                    );
                    self.send(SlotEvent::Crashed {
                        slot: self.slot,
                        reason: reason.clone(),
                    })
                    .await;
                    last_error = Some(reason);

                    if self.stop.is_cancelled() {
                        self.finish(SlotOutcome::Stopped, last_exit, restarts, last_error)
                            .await;
                        return;
                    }
                    if restarts >= self.restart_budget {
                        error!(
                            slot = self.slot.0,
                            worker_id = %self.worker_id,
                            restarts,
                            "Restart budget exhausted, retiring slot"
                        );
                        self.finish(SlotOutcome::Retired, last_exit, restarts, last_error)
                            .await;
                        return;
                    }

                    restarts += 1;
                    let delay = self.config.restart_backoff.delay(restarts);
                    info!(
                        slot = self.slot.0,
                        restarts,
                        delay_ms = delay.as_millis() as u64,
                        "Restarting worker"
                    );
                    self.send(SlotEvent::Restarting {
                        slot: self.slot,
                        restarts,
                        delay,
                    })
                    .await;
                    tokio::select! {
                        _ = self.stop.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Launch one process and follow it until it ends.
    async fn run_process(&self, attempt: u32) -> Result<ProcessEnd, SupervisorError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .env("TASKPOOL_WORKER_ID", self.worker_id.as_str())
            .env("TASKPOOL_TEAM", &self.team)
            .env(
                "TASKPOOL_TASK_TIMEOUT_SECS",
                self.task_timeout.as_secs().to_string(),
            )
            .env(
                "TASKPOOL_HEARTBEAT_SECS",
                self.config.worker_heartbeat().as_secs().to_string(),
            )
            .envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The worker leads a group its engine joins, so teardown reaches both.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let pid = child.id();
        info!(slot = self.slot.0, worker_id = %self.worker_id, pid, attempt, "Worker spawned");
        self.send(SlotEvent::Spawned {
            slot: self.slot,
            pid,
            attempt,
        })
        .await;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Stream(std::io::Error::other("stdout not piped")))?;
        if let Some(stderr) = child.stderr.take() {
            let slot = self.slot;
            let worker_id = self.worker_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(slot = slot.0, worker_id = %worker_id, "{line}");
                }
            });
        }
        let mut stdin = child.stdin.take();

        let liveness = self.config.liveness_timeout;
        let mut lines = BufReader::new(stdout).lines();
        let mut stopped = false;
        let mut grace_deadline: Option<Instant> = None;

        loop {
            let deadline = grace_deadline.unwrap_or_else(|| Instant::now() + liveness);
            tokio::select! {
                _ = self.stop.cancelled(), if grace_deadline.is_none() => {
                    info!(slot = self.slot.0, worker_id = %self.worker_id, "Asking worker to stop");
                    grace_deadline = Some(Instant::now() + self.config.grace_period);
                    if let Some(input) = stdin.take() {
                        request_stop(input).await;
                    }
                }
                next = timeout_at(deadline, lines.next_line()) => match next {
                    Err(_) => {
                        kill(&mut child).await;
                        return match grace_deadline {
                            Some(_) => {
                                warn!(slot = self.slot.0, "Grace period expired, worker killed");
                                Ok(ProcessEnd::Terminated)
                            }
                            None => Err(SupervisorError::Hung(liveness)),
                        };
                    }
                    Ok(Ok(Some(raw))) => match StatusLine::parse(&raw) {
                        Ok(line) => {
                            if line.event == StatusEvent::Stopped {
                                stopped = true;
                            }
                            self.send(SlotEvent::Line { slot: self.slot, line }).await;
                        }
                        Err(e) => {
                            warn!(slot = self.slot.0, error = %e, "Ignoring malformed status line");
                        }
                    },
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        kill(&mut child).await;
                        return Err(SupervisorError::Stream(e));
                    }
                },
            }
        }

        // Stream closed; the process should be on its way out.
        let wait_deadline =
            grace_deadline.unwrap_or_else(|| Instant::now() + self.config.grace_period);
        let status = match timeout_at(wait_deadline, child.wait()).await {
            Ok(status) => status.map_err(SupervisorError::Stream)?,
            Err(_) => {
                kill(&mut child).await;
                return match grace_deadline {
                    Some(_) => Ok(ProcessEnd::Terminated),
                    None => Err(SupervisorError::Lingering),
                };
            }
        };
        // An engine orphaned by a crashed worker must not keep running its task.
        if let Some(pid) = pid {
            kill_group(pid);
        }

        match status.code() {
            Some(0) => Ok(ProcessEnd::Exited { stopped }),
            Some(code) => Err(SupervisorError::Exit(code)),
            None => Err(SupervisorError::Signaled),
        }
    }

    async fn finish(
        &self,
        outcome: SlotOutcome,
        exit_code: Option<i32>,
        restarts: u32,
        last_error: Option<String>,
    ) {
        self.send(SlotEvent::Finished {
            slot: self.slot,
            outcome,
            exit_code,
            restarts,
            last_error,
        })
        .await;
    }

    async fn send(&self, event: SlotEvent) {
        if self.events.send(event).await.is_err() {
            debug!(slot = self.slot.0, "Coordinator no longer listening");
        }
    }
}

/// Write the shutdown command and close the worker's stdin.
async fn request_stop(mut input: ChildStdin) {
    let line = match WorkerCommand::Shutdown.to_line() {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Could not encode shutdown command");
            return;
        }
    };
    let result = async {
        input.write_all(line.as_bytes()).await?;
        input.write_all(b"\n").await?;
        input.flush().await?;
        input.shutdown().await
    }
    .await;
    if let Err(e) = result {
        debug!(error = %e, "Worker stdin already closed");
    }
}

/// Kill the worker and everything still in its process group.
async fn kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Kill failed, process likely gone");
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
