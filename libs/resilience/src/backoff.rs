/// Exponential backoff schedule with jitter and a runtime scale factor.
use rand::Rng;
use std::time::Duration;

/// Computes the delay before retry attempt `k` as
/// `initial * 2^(k-1) * scale`, capped at `max`, with optional ±30% jitter.
///
/// The schedule itself is immutable; the per-call `scale` lets a caller
/// apply a global pressure signal (e.g. a downstream rate-limit condition)
/// on top of the per-attempt exponential curve.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound for any computed delay (applied after scaling)
    pub max: Duration,
    /// Add random jitter to each delay (±30%)
    pub jitter: bool,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl BackoffSchedule {
    pub fn builder() -> BackoffScheduleBuilder {
        BackoffScheduleBuilder::default()
    }

    /// Delay before retry attempt `attempt` (1-based), scaled by `scale`.
    ///
    /// `attempt == 0` is treated as 1 so a misuse never yields a zero delay.
    pub fn delay_for(&self, attempt: u32, scale: f64) -> Duration {
        let attempt = attempt.max(1);
        let exponent = (attempt - 1).min(16); // 2^16 already saturates any sane cap
        let base_ms = self.initial.as_millis() as f64 * f64::from(1u32 << exponent);
        let scaled_ms = (base_ms * scale.max(1.0)).min(self.max.as_millis() as f64);
        let delay = Duration::from_millis(scaled_ms as u64);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    /// Delay without any external scale factor.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        self.delay_for(attempt, 1.0)
    }
}

fn apply_jitter(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
}

/// Builder for [`BackoffSchedule`].
#[derive(Debug, Default)]
pub struct BackoffScheduleBuilder {
    initial: Option<Duration>,
    max: Option<Duration>,
    jitter: Option<bool>,
}

impl BackoffScheduleBuilder {
    pub fn initial(mut self, initial: Duration) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn build(self) -> BackoffSchedule {
        let defaults = BackoffSchedule::default();
        BackoffSchedule {
            initial: self.initial.unwrap_or(defaults.initial),
            max: self.max.unwrap_or(defaults.max),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}
