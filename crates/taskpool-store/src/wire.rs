//! Request and response bodies of the tracking service's HTTP API.
//!
//! - `GET  /teams/{team}/tasks?state={state}` -> `[Task]`
//! - `GET  /tasks/{key}` -> `Task`
//! - `POST /tasks/{key}/transition` `{from, to}` -> `200 Task` | `409 {actual}`
//! - `POST /tasks/{key}/notes` `{body}` -> `201 Note`

use serde::{Deserialize, Serialize};
use taskpool_core::TaskState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub from: TaskState,
    pub to: TaskState,
}

/// Body of a `409 Conflict` answer to a transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictBody {
    pub actual: TaskState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
