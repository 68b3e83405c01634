/// Deadlines and timeouts for bounding async work.
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// The bounded operation did not finish within its time budget.
#[derive(Debug, thiserror::Error)]
#[error("operation timed out after {0:?}")]
pub struct TimeoutError(pub Duration);

/// Bound `future` to `duration`. The caller decides what a downstream
/// error means; this only reports whether the budget was exceeded.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError(duration))
}

/// A fixed point in time budgeted for a multi-step operation, such as
/// draining in-flight jobs during shutdown. Each step asks for the
/// remaining budget instead of re-applying the full grace period.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(grace: Duration) -> Self {
        Self {
            expires_at: Instant::now() + grace,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Bound `future` by the remaining budget.
    pub async fn bound<F, T>(&self, future: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(TimeoutError(Duration::ZERO));
        }
        with_timeout(remaining, future).await
    }
}
