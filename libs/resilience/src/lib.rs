/// Resilience primitives shared by the pipeline services.
///
/// Provides backoff schedule computation for retryable work and a timeout
/// wrapper for bounding individual async operations.
pub mod backoff;
pub mod timeout;

pub use backoff::{BackoffSchedule, BackoffScheduleBuilder};
pub use timeout::{with_timeout, Deadline, TimeoutError};
