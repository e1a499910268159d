//! Run summary delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use taskpool_core::RunSummary;

use crate::error::SinkError;

/// Receives the summary at the end of a run.
#[async_trait]
pub trait SummarySink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, summary: &RunSummary) -> Result<(), SinkError>;
}

/// Writes the summary to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl SummarySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, summary: &RunSummary) -> Result<(), SinkError> {
        info!(
            team = %summary.team,
            end_reason = ?summary.end_reason,
            tasks_completed = summary.tasks_completed,
            tasks_failed = summary.tasks_failed,
            tasks_abandoned = summary.tasks_abandoned,
            slots_retired = summary.slots_retired,
            stale_flagged = summary.stale_flagged,
            stale_reclaimed = summary.stale_reclaimed,
            store_failures = summary.store_failures,
            duration_ms = summary.duration.as_millis() as u64,
            "Run finished"
        );
        for slot in &summary.slots {
            if let Some(error) = &slot.last_error {
                warn!(
                    slot = slot.slot.0,
                    worker_id = %slot.worker_id,
                    outcome = ?slot.outcome,
                    restarts = slot.restarts,
                    last_error = %error,
                    "Slot had failures"
                );
            }
        }
        Ok(())
    }
}

/// Posts the summary as JSON to a URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SummarySink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, summary: &RunSummary) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(summary).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.as_u16()));
        }
        info!(url = %self.url, "Run summary posted");
        Ok(())
    }
}
