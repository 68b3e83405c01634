/// Per-source fixed-window rate limiting.
///
/// Each source (gateway connection/instance) gets an independent window
/// that resets wholesale when it elapses. Fixed windows are intentional:
/// they bound memory to one entry per active source and keep admission
/// decisions auditable, at the cost of burst tolerance at window edges.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    window_start: Instant,
}

/// Outcome of an admission check. Checking counts as a request.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// Time until the source's window resets
    pub retry_after: Duration,
}

/// Read-only view of a source's window for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    pub source: String,
    pub requests: u32,
    pub remaining: u32,
    pub reset_in_secs: u64,
    pub limit: u32,
}

pub struct RateLimiter {
    windows: RwLock<HashMap<String, Window>>,
    max_requests: u32,
    window_duration: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            max_requests: config.max_requests,
            window_duration: Duration::from_secs(config.window_seconds),
        }
    }

    /// Admit or reject a request from `source`.
    ///
    /// Never fails: an admission-control bug must not take down ingestion,
    /// so anything the limiter cannot account for degrades to allow.
    pub async fn admit(&self, source: &str) -> RateLimitDecision {
        self.admit_at(source, Instant::now()).await
    }

    async fn admit_at(&self, source: &str, now: Instant) -> RateLimitDecision {
        if source.trim().is_empty() {
            tracing::warn!("rate limiter saw empty source, allowing request");
            return RateLimitDecision {
                allowed: true,
                remaining: self.max_requests,
                limit: self.max_requests,
                retry_after: Duration::ZERO,
            };
        }

        let mut windows = self.windows.write().await;
        let window = windows.entry(source.to_string()).or_insert(Window {
            count: 0,
            window_start: now,
        });

        // Full reset once the window has elapsed; no partial carry-over
        if now.duration_since(window.window_start) >= self.window_duration {
            window.count = 0;
            window.window_start = now;
        }

        window.count += 1;
        let allowed = window.count <= self.max_requests;
        let remaining = self.max_requests.saturating_sub(window.count);
        let retry_after = self
            .window_duration
            .saturating_sub(now.duration_since(window.window_start));

        if !allowed {
            tracing::debug!(
                source = %source,
                count = window.count,
                limit = self.max_requests,
                "rate limit exceeded"
            );
        }

        RateLimitDecision {
            allowed,
            remaining,
            limit: self.max_requests,
            retry_after,
        }
    }

    /// Point-in-time view of a source's window. Does not count as a request.
    pub async fn snapshot(&self, source: &str) -> RateLimitSnapshot {
        let now = Instant::now();
        let windows = self.windows.read().await;
        let (requests, reset_in) = match windows.get(source) {
            Some(w) if now.duration_since(w.window_start) < self.window_duration => (
                w.count,
                self.window_duration
                    .saturating_sub(now.duration_since(w.window_start)),
            ),
            _ => (0, Duration::ZERO),
        };

        RateLimitSnapshot {
            source: source.to_string(),
            requests,
            remaining: self.max_requests.saturating_sub(requests),
            reset_in_secs: reset_in.as_secs(),
            limit: self.max_requests,
        }
    }

    /// Snapshots of every source with a live window, ordered by source.
    /// Read-only, like [`snapshot`](Self::snapshot).
    pub async fn snapshot_all(&self) -> Vec<RateLimitSnapshot> {
        let now = Instant::now();
        let windows = self.windows.read().await;
        let mut all: Vec<RateLimitSnapshot> = windows
            .iter()
            .filter(|(_, w)| now.duration_since(w.window_start) < self.window_duration)
            .map(|(source, w)| RateLimitSnapshot {
                source: source.clone(),
                requests: w.count,
                remaining: self.max_requests.saturating_sub(w.count),
                reset_in_secs: self
                    .window_duration
                    .saturating_sub(now.duration_since(w.window_start))
                    .as_secs(),
                limit: self.max_requests,
            })
            .collect();
        all.sort_by(|a, b| a.source.cmp(&b.source));
        all
    }

    /// Drop windows that have fully elapsed. Safe to call repeatedly.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let window_duration = self.window_duration;
        let mut windows = self.windows.write().await;
        windows.retain(|_, w| now.duration_since(w.window_start) < window_duration);
    }

    /// Number of sources currently tracked.
    pub async fn tracked_sources(&self) -> usize {
        self.windows.read().await.len()
    }
}
