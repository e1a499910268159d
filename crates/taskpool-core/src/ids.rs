//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

/// Team-scoped task identifier such as `ENG-42`.
///
/// The tracking service assigns the numeric suffix monotonically within a
/// team, so ordering by key is ordering by creation. Keys compare by team
/// first, then numerically (`ENG-9 < ENG-10`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskKey {
    team: String,
    number: u64,
}

impl TaskKey {
    /// Create a key from its parts.
    pub fn new(team: impl Into<String>, number: u64) -> Self {
        Self {
            team: team.into(),
            number,
        }
    }

    /// Team prefix of the key.
    pub fn team(&self) -> &str {
        &self.team
    }

    /// Monotonic number within the team.
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.team, self.number)
    }
}

impl FromStr for TaskKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (team, number) = s
            .rsplit_once('-')
            .ok_or_else(|| CoreError::InvalidTaskKey(s.to_string()))?;
        if team.is_empty() {
            return Err(CoreError::InvalidTaskKey(s.to_string()));
        }
        let number = number
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidTaskKey(s.to_string()))?;
        Ok(Self::new(team, number))
    }
}

impl TryFrom<String> for TaskKey {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TaskKey> for String {
    fn from(key: TaskKey) -> Self {
        key.to_string()
    }
}

/// Identifier a worker process reports in its status lines.
///
/// Stable for the lifetime of a slot: every process the slot launches
/// (including restarts) reuses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a new WorkerId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random WorkerId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Worker id for a coordinator slot within a run.
    pub fn for_slot(run_tag: &str, slot: SlotId) -> Self {
        Self(format!("{}-w{}", run_tag, slot.0))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Position in the coordinator's worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}
