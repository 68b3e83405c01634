/// The seam between the pipeline and the event-application layer.
///
/// The surrounding application supplies an [`EventProcessor`]; the queue
/// calls it once per dispatch attempt and maps the returned error class
/// onto its retry policy.
use async_trait::async_trait;
use thiserror::Error;

use crate::models::Job;

/// What a worker hands to the processor: one job, or a batch of jobs
/// sharing event type and source, in enqueue (FIFO) order.
#[derive(Debug, Clone)]
pub enum WorkUnit {
    Single(Job),
    Batch(Vec<Job>),
}

impl WorkUnit {
    pub fn jobs(&self) -> &[Job] {
        match self {
            WorkUnit::Single(job) => std::slice::from_ref(job),
            WorkUnit::Batch(jobs) => jobs,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    pub fn event_type(&self) -> &str {
        match self {
            WorkUnit::Single(job) => &job.event_type,
            WorkUnit::Batch(jobs) => jobs.first().map(|j| j.event_type.as_str()).unwrap_or(""),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            WorkUnit::Single(job) => &job.source,
            WorkUnit::Batch(jobs) => jobs.first().map(|j| j.source.as_str()).unwrap_or(""),
        }
    }
}

/// Failure classes reported by the processor.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Retryable failure (downstream hiccup, contention, timeout)
    #[error("transient failure: {0}")]
    Transient(String),

    /// The downstream store is rate limiting us; retryable, and a signal
    /// to slow every retry, not just this job's
    #[error("downstream rate limited: {0}")]
    RateLimited(String),

    /// Permanently unprocessable (e.g. malformed payload); never retried
    #[error("non-retryable failure: {0}")]
    NonRetryable(String),
}

impl ProcessingError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProcessingError::NonRetryable(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProcessingError::RateLimited(_))
    }
}

#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, unit: &WorkUnit) -> Result<(), ProcessingError>;
}

/// Default processor wired in when no application layer is attached:
/// acknowledges every unit and logs it at debug level.
pub struct LoggingProcessor;

#[async_trait]
impl EventProcessor for LoggingProcessor {
    async fn process(&self, unit: &WorkUnit) -> Result<(), ProcessingError> {
        tracing::debug!(
            event_type = %unit.event_type(),
            source = %unit.source(),
            jobs = unit.len(),
            "processed work unit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WebhookEvent;
    use serde_json::json;

    fn job(event_type: &str) -> Job {
        Job::new(WebhookEvent::new(event_type, "primary", json!({})), 100)
    }

    #[test]
    fn test_work_unit_accessors() {
        let single = WorkUnit::Single(job("messages.upsert"));
        assert_eq!(single.len(), 1);
        assert_eq!(single.event_type(), "messages.upsert");
        assert_eq!(single.source(), "primary");

        let batch = WorkUnit::Batch(vec![job("chats.upsert"), job("chats.upsert")]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.event_type(), "chats.upsert");
    }

    #[test]
    fn test_error_classification() {
        assert!(ProcessingError::Transient("x".into()).is_retryable());
        assert!(ProcessingError::RateLimited("x".into()).is_retryable());
        assert!(ProcessingError::RateLimited("x".into()).is_rate_limited());
        assert!(!ProcessingError::NonRetryable("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_logging_processor_accepts() {
        let unit = WorkUnit::Single(job("messages.upsert"));
        assert!(LoggingProcessor.process(&unit).await.is_ok());
    }
}
