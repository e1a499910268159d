//! Claim and reclaim markers.
//!
//! The tracking service offers no lock, only append-only notes and a
//! state-gated transition. Markers are notes with a fixed prefix followed
//! by a JSON payload, so they survive any store that can hold text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::WorkerId;

const CLAIM_PREFIX: &str = "[claim] ";
const RECLAIM_PREFIX: &str = "[reclaim] ";

/// Records which worker holds a task and since when.
///
/// Appended immediately before the `Todo -> InProgress` transition and
/// re-appended periodically while the task executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMarker {
    pub worker_id: WorkerId,
    pub claimed_at: DateTime<Utc>,

    /// Number of reclaim boundaries on the task when the claim was made.
    /// Markers from an earlier epoch belong to a claim that was taken away.
    #[serde(default)]
    pub epoch: u32,
}

impl ClaimMarker {
    pub fn new(worker_id: WorkerId, claimed_at: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            claimed_at,
            epoch: 0,
        }
    }

    /// Builder method to set the claim epoch.
    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    /// Encode as a note body.
    pub fn to_note_body(&self) -> String {
        // Serializing two plain fields cannot fail.
        let payload = serde_json::to_string(self).unwrap_or_default();
        format!("{CLAIM_PREFIX}{payload}")
    }

    /// Decode from a note body. Returns `None` for ordinary notes.
    pub fn parse(body: &str) -> Option<Self> {
        let payload = body.strip_prefix(CLAIM_PREFIX)?;
        serde_json::from_str(payload).ok()
    }
}

/// Boundary written when the staleness detector returns a task to `Todo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimMarker {
    /// Worker that held the abandoned claim, if known.
    pub previous_worker: Option<WorkerId>,

    pub reclaimed_at: DateTime<Utc>,

    /// When false, the next executor only sees notes after this marker.
    pub carry_notes: bool,
}

impl ReclaimMarker {
    pub fn new(
        previous_worker: Option<WorkerId>,
        reclaimed_at: DateTime<Utc>,
        carry_notes: bool,
    ) -> Self {
        Self {
            previous_worker,
            reclaimed_at,
            carry_notes,
        }
    }

    /// Encode as a note body.
    pub fn to_note_body(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_default();
        format!("{RECLAIM_PREFIX}{payload}")
    }

    /// Decode from a note body. Returns `None` for ordinary notes.
    pub fn parse(body: &str) -> Option<Self> {
        let payload = body.strip_prefix(RECLAIM_PREFIX)?;
        serde_json::from_str(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_marker_note_roundtrip() {
        let marker = ClaimMarker::new(WorkerId::new("run-w0"), Utc::now());
        let body = marker.to_note_body();
        assert!(body.starts_with("[claim] "));
        assert_eq!(ClaimMarker::parse(&body), Some(marker));
    }

    #[test]
    fn test_marker_without_epoch_reads_as_first_epoch() {
        let body = r#"[claim] {"worker_id":"w1","claimed_at":"2026-01-01T00:00:00Z"}"#;
        assert_eq!(ClaimMarker::parse(body).unwrap().epoch, 0);
    }

    #[test]
    fn test_plain_note_is_not_a_marker() {
        assert!(ClaimMarker::parse("looks good to me").is_none());
        assert!(ClaimMarker::parse("[claim] not json").is_none());
        assert!(ReclaimMarker::parse("[claim] {}").is_none());
    }
}
