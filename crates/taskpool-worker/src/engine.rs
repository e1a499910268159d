//! Execution engine seam.
//!
//! The worker never looks inside the engine: it hands over the task and
//! gets back a terminal outcome plus free text.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use taskpool_core::{Task, TaskKey};

use crate::error::EngineError;

/// Longest engine output kept as outcome detail.
const MAX_DETAIL_CHARS: usize = 4000;

/// Input for one engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub task_id: TaskKey,
    pub title: String,
    pub description: String,
    /// Prior note bodies, oldest first, markers removed.
    pub notes: Vec<String>,
}

impl EngineRequest {
    /// Build the request for a claimed task.
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.key.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            notes: task
                .notes_for_execution()
                .into_iter()
                .map(|n| n.body.clone())
                .collect(),
        }
    }
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Completed { detail: String },
    Failed { reason: String, detail: String },
}

impl EngineOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            detail: String::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Runs the work for one task.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError>;
}

/// Engine that runs an external command once per task.
///
/// The request is written to the command's stdin as one JSON document and
/// stdin is closed. Exit status 0 is `Completed` with stdout as detail; any
/// other status is `Failed` with stderr as detail. The child is killed if
/// the invocation future is dropped, which is how the task timeout lands.
///
/// # Example
///
/// ```rust,no_run
/// use taskpool_worker::{CommandEngine, EngineRequest, ExecutionEngine};
/// # async fn run(request: EngineRequest) -> Result<(), Box<dyn std::error::Error>> {
/// let engine = CommandEngine::new("./do-task.sh").with_env("MODE", "ci");
/// let outcome = engine.execute(&request).await?;
/// println!("completed: {}", outcome.is_completed());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    env_vars: Vec<(String, String)>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
        }
    }

    /// Add a command line argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several command line arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl ExecutionEngine for CommandEngine {
    async fn execute(&self, request: &EngineRequest) -> Result<EngineOutcome, EngineError> {
        info!(program = %self.program, task = %request.task_id, "Starting engine");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("TASKPOOL_TASK_ID", request.task_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %self.program, error = %e, "Failed to spawn engine");
            EngineError::Spawn(e)
        })?;

        // Written concurrently with the output readers: an engine that
        // echoes while it reads would otherwise fill its stdout pipe and
        // stall both sides.
        let payload = serde_json::to_vec(request)?;
        let stdin_writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                // An engine that ignores its input may close stdin early.
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(error = %e, "Engine closed stdin before reading request");
                }
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Io(std::io::Error::other("engine stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Io(std::io::Error::other("engine stderr not piped")))?;

        let task_id = request.task_id.clone();
        let stderr_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            warn!(task = %task_id, stderr = %trimmed, "Engine stderr");
                            collected.push_str(trimmed);
                            collected.push('\n');
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Error reading engine stderr");
                        break;
                    }
                }
            }
            collected
        });

        let mut output = String::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            debug!(task = %request.task_id, line = %line, "Engine stdout");
            output.push_str(&line);
            output.push('\n');
        }

        let status = child.wait().await?;
        if let Some(writer) = stdin_writer {
            let _ = writer.await;
        }
        let errors = stderr_reader.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);
        info!(task = %request.task_id, exit_code, "Engine exited");

        if status.success() {
            Ok(EngineOutcome::Completed {
                detail: tail(&output),
            })
        } else {
            Ok(EngineOutcome::Failed {
                reason: format!("engine exited with code {exit_code}"),
                detail: tail(&errors),
            })
        }
    }
}

/// Last `MAX_DETAIL_CHARS` characters, trimmed.
fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= MAX_DETAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - MAX_DETAIL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use taskpool_core::{Note, ReclaimMarker};

    use super::*;

    fn request() -> EngineRequest {
        EngineRequest {
            task_id: TaskKey::new("ENG", 5),
            title: "fix it".to_string(),
            description: "details".to_string(),
            notes: vec!["earlier attempt".to_string()],
        }
    }

    #[test]
    fn test_request_skips_markers_and_fresh_boundary() {
        let mut task = Task::new(TaskKey::new("ENG", 5), "fix it");
        let note = |body: String| Note {
            id: body.clone(),
            body,
            created_at: chrono::Utc::now(),
        };
        task.notes.push(note("old context".to_string()));
        task.notes
            .push(note(ReclaimMarker::new(None, chrono::Utc::now(), false).to_note_body()));
        task.notes.push(note("after reclaim".to_string()));

        let req = EngineRequest::for_task(&task);
        assert_eq!(req.notes, vec!["after reclaim"]);
    }

    #[test]
    fn test_tail_keeps_end_of_output() {
        let long = "x".repeat(MAX_DETAIL_CHARS) + "END";
        let kept = tail(&long);
        assert_eq!(kept.chars().count(), MAX_DETAIL_CHARS);
        assert!(kept.ends_with("END"));
    }

    #[tokio::test]
    async fn test_zero_exit_is_completed_with_stdout() {
        let engine = CommandEngine::new("sh").with_args(["-c", "cat >/dev/null; echo done"]);
        let outcome = engine.execute(&request()).await.unwrap();
        assert_eq!(
            outcome,
            EngineOutcome::Completed {
                detail: "done".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_request_reaches_engine_stdin() {
        let engine = CommandEngine::new("sh").with_args(["-c", "cat"]);
        let EngineOutcome::Completed { detail } = engine.execute(&request()).await.unwrap() else {
            panic!("expected completion");
        };
        let echoed: EngineRequest = serde_json::from_str(&detail).unwrap();
        assert_eq!(echoed, request());
    }

    #[tokio::test]
    async fn test_large_request_to_echoing_engine_does_not_stall() {
        let mut big = request();
        big.notes = (0..64).map(|i| format!("{i}:{}", "n".repeat(4000))).collect();

        let engine = CommandEngine::new("sh").with_args(["-c", "cat"]);
        let outcome = tokio::time::timeout(Duration::from_secs(10), engine.execute(&big))
            .await
            .expect("engine stalled on a large request")
            .unwrap();

        let EngineOutcome::Completed { detail } = outcome else {
            panic!("expected completion");
        };
        // Detail is the tail of the echoed request.
        assert_eq!(detail.chars().count(), MAX_DETAIL_CHARS);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_with_stderr() {
        let engine = CommandEngine::new("sh").with_args(["-c", "echo broken >&2; exit 3"]);
        let outcome = engine.execute(&request()).await.unwrap();
        assert_eq!(
            outcome,
            EngineOutcome::Failed {
                reason: "engine exited with code 3".to_string(),
                detail: "broken".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let engine = CommandEngine::new("/nonexistent/taskpool-engine");
        let err = engine.execute(&request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn(_)));
    }
}
