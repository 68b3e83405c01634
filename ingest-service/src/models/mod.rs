use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// An inbound gateway event, already authenticated by the caller.
///
/// `payload` is opaque to the pipeline: it is fingerprinted for
/// deduplication and otherwise passed through to the processor unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "event")]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            payload,
        }
    }

    /// A malformed event (missing type or source) is rejected at admission
    /// and never reaches the queue.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_type.trim().is_empty() {
            return Err("event type is required".to_string());
        }
        if self.source.trim().is_empty() {
            return Err("source is required".to_string());
        }
        Ok(())
    }
}

/// Processing lifecycle of a job.
///
/// `Pending -> Processing -> Completed` on success,
/// `Pending -> Processing -> Pending` on a retryable failure (bounded by
/// the attempt cap), `Pending -> Processing -> Failed` once exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A unit of admitted work owned by the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub priority: u8,
    pub state: JobState,
    pub attempts: u32,
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl Job {
    pub fn new(event: WebhookEvent, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event.event_type,
            source: event.source,
            payload: event.payload,
            priority,
            state: JobState::Pending,
            attempts: 0,
            enqueued_at: Instant::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock latency from admission to completion, if finished.
    pub fn latency(&self) -> Option<std::time::Duration> {
        self.finished_at.map(|f| f.duration_since(self.enqueued_at))
    }
}
