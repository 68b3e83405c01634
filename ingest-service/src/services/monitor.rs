/// Passive telemetry aggregation for the pipeline.
///
/// The monitor observes; it never influences dispatch. Queue workers feed
/// it completion latencies, the admission path feeds it inline ("sync")
/// processing telemetry, and `metrics()` folds everything into a
/// point-in-time snapshot with a derived health verdict.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use super::job_queue::QueueStats;

const MAX_SAMPLES: usize = 10_000;
const MAX_SYNC_SAMPLES: usize = 1_000;

/// No completion for this long means the pipeline is stuck.
const CRITICAL_AFTER: Duration = Duration::from_secs(30);
const DEGRADED_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct MonitorInner {
    latencies: VecDeque<Duration>,
    sync_latencies: VecDeque<Duration>,
    total_processed: u64,
    sync_processed: u64,
    sync_failed: u64,
    last_completed_at: Option<Instant>,
    sec_window_start: Instant,
    sec_count: u64,
    min_window_start: Instant,
    min_count: u64,
}

impl MonitorInner {
    fn new(now: Instant) -> Self {
        Self {
            latencies: VecDeque::with_capacity(1024),
            sync_latencies: VecDeque::with_capacity(128),
            total_processed: 0,
            sync_processed: 0,
            sync_failed: 0,
            last_completed_at: None,
            sec_window_start: now,
            sec_count: 0,
            min_window_start: now,
            min_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputStats {
    pub per_second: u64,
    pub per_minute: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub processed: u64,
    pub failed: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_secs_ago: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub latency: LatencyStats,
    pub throughput: ThroughputStats,
    pub queue: QueueStats,
    pub sync: SyncStats,
    pub health: Health,
}

pub struct PipelineMonitor {
    inner: Mutex<MonitorInner>,
}

impl Default for PipelineMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner::new(Instant::now())),
        }
    }

    /// Record one completed unit of work. `is_sync` marks work done inline
    /// with the admission path rather than by the deferred worker pool.
    pub async fn record_latency(&self, latency: Duration, is_sync: bool) {
        self.record_latency_at(latency, is_sync, Instant::now()).await
    }

    async fn record_latency_at(&self, latency: Duration, is_sync: bool, now: Instant) {
        let mut inner = self.inner.lock().await;

        inner.latencies.push_back(latency);
        if inner.latencies.len() > MAX_SAMPLES {
            inner.latencies.pop_front();
        }
        if is_sync {
            inner.sync_latencies.push_back(latency);
            if inner.sync_latencies.len() > MAX_SYNC_SAMPLES {
                inner.sync_latencies.pop_front();
            }
            inner.sync_processed += 1;
        }

        inner.total_processed += 1;
        inner.last_completed_at = Some(now);

        // Windowed throughput counters reset wholesale on elapse
        if now.duration_since(inner.sec_window_start) >= Duration::from_secs(1) {
            inner.sec_window_start = now;
            inner.sec_count = 0;
        }
        inner.sec_count += 1;

        if now.duration_since(inner.min_window_start) >= Duration::from_secs(60) {
            inner.min_window_start = now;
            inner.min_count = 0;
        }
        inner.min_count += 1;
    }

    /// A failure on the inline admission path, independent of async job
    /// failures tracked by the queue.
    pub async fn record_sync_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.sync_failed += 1;
    }

    /// Snapshot of everything the monitor knows, combined with the queue's
    /// own counters. Empty buffers produce zeroed stats.
    pub async fn metrics(&self, queue: QueueStats) -> MetricsSnapshot {
        self.metrics_at(queue, Instant::now()).await
    }

    async fn metrics_at(&self, queue: QueueStats, now: Instant) -> MetricsSnapshot {
        let inner = self.inner.lock().await;

        let latency = summarize(&inner.latencies);
        let sync_avg = average_ms(&inner.sync_latencies);

        let per_second = if now.duration_since(inner.sec_window_start) < Duration::from_secs(1) {
            inner.sec_count
        } else {
            0
        };
        let per_minute = if now.duration_since(inner.min_window_start) < Duration::from_secs(60) {
            inner.min_count
        } else {
            0
        };

        let last_ago = inner
            .last_completed_at
            .map(|at| now.duration_since(at));
        let status = derive_health(last_ago, queue.completed, queue.failed);

        MetricsSnapshot {
            latency,
            throughput: ThroughputStats {
                per_second,
                per_minute,
                total: inner.total_processed,
            },
            queue,
            sync: SyncStats {
                processed: inner.sync_processed,
                failed: inner.sync_failed,
                avg_ms: sync_avg,
            },
            health: Health {
                status,
                last_completed_secs_ago: last_ago.map(|d| d.as_secs()),
            },
        }
    }

    /// Drop all buffers and counters. Used for test isolation and the
    /// administrative reset endpoint.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        *inner = MonitorInner::new(Instant::now());
    }
}

/// Health verdict. A pipeline that has never completed anything is
/// healthy-by-vacuity; "stuck" only means something once work has flowed.
fn derive_health(last_completed: Option<Duration>, completed: u64, failed: u64) -> HealthStatus {
    if let Some(ago) = last_completed {
        if ago >= CRITICAL_AFTER {
            return HealthStatus::Critical;
        }
        if ago >= DEGRADED_AFTER {
            return HealthStatus::Degraded;
        }
    }
    if completed > 0 && failed * 10 > completed {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

fn summarize(samples: &VecDeque<Duration>) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats {
            avg_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            samples: 0,
        };
    }

    let mut sorted: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let index = |q: f64| -> f64 { sorted[(((n as f64) * q) as usize).min(n - 1)] };

    LatencyStats {
        avg_ms: sum / n as f64,
        min_ms: sorted[0],
        max_ms: sorted[n - 1],
        p95_ms: index(0.95),
        p99_ms: index(0.99),
        samples: n,
    }
}

fn average_ms(samples: &VecDeque<Duration>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
    sum / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_queue_stats() -> QueueStats {
        QueueStats {
            pending: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            queue_length: 0,
            pending_batches: 0,
            backoff_multiplier: 1.0,
        }
    }

    fn queue_stats(completed: u64, failed: u64) -> QueueStats {
        QueueStats {
            completed,
            failed,
            ..empty_queue_stats()
        }
    }

    #[tokio::test]
    async fn test_empty_monitor_zeroed_stats() {
        let monitor = PipelineMonitor::new();
        let snapshot = monitor.metrics(empty_queue_stats()).await;
        assert_eq!(snapshot.latency.samples, 0);
        assert_eq!(snapshot.latency.avg_ms, 0.0);
        assert_eq!(snapshot.throughput.total, 0);
        assert_eq!(snapshot.health.status, HealthStatus::Healthy);
        assert!(snapshot.health.last_completed_secs_ago.is_none());
    }

    #[tokio::test]
    async fn test_latency_percentiles() {
        let monitor = PipelineMonitor::new();
        // 100 samples: 1ms..=100ms
        for ms in 1..=100u64 {
            monitor
                .record_latency(Duration::from_millis(ms), false)
                .await;
        }
        let snapshot = monitor.metrics(empty_queue_stats()).await;
        assert_eq!(snapshot.latency.samples, 100);
        assert_eq!(snapshot.latency.min_ms, 1.0);
        assert_eq!(snapshot.latency.max_ms, 100.0);
        // sorted[floor(0.95 * 100)] = sorted[95] = 96ms
        assert_eq!(snapshot.latency.p95_ms, 96.0);
        assert_eq!(snapshot.latency.p99_ms, 100.0);
        assert!((snapshot.latency.avg_ms - 50.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sync_samples_tracked_separately() {
        let monitor = PipelineMonitor::new();
        monitor.record_latency(Duration::from_millis(10), true).await;
        monitor.record_latency(Duration::from_millis(30), true).await;
        monitor.record_latency(Duration::from_millis(500), false).await;
        monitor.record_sync_failure().await;

        let snapshot = monitor.metrics(empty_queue_stats()).await;
        assert_eq!(snapshot.sync.processed, 2);
        assert_eq!(snapshot.sync.failed, 1);
        assert!((snapshot.sync.avg_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.throughput.total, 3);
    }

    #[tokio::test]
    async fn test_buffer_caps() {
        let monitor = PipelineMonitor::new();
        for _ in 0..(MAX_SAMPLES + 50) {
            monitor.record_latency(Duration::from_millis(1), false).await;
        }
        let snapshot = monitor.metrics(empty_queue_stats()).await;
        assert_eq!(snapshot.latency.samples, MAX_SAMPLES);
        assert_eq!(snapshot.throughput.total, (MAX_SAMPLES + 50) as u64);
    }

    #[tokio::test]
    async fn test_health_critical_when_stalled() {
        let monitor = PipelineMonitor::new();
        let start = Instant::now();
        monitor
            .record_latency_at(Duration::from_millis(5), false, start)
            .await;

        let snapshot = monitor
            .metrics_at(queue_stats(10, 0), start + Duration::from_secs(35))
            .await;
        assert_eq!(snapshot.health.status, HealthStatus::Critical);
        assert_eq!(snapshot.health.last_completed_secs_ago, Some(35));
    }

    #[tokio::test]
    async fn test_health_degraded_when_slow() {
        let monitor = PipelineMonitor::new();
        let start = Instant::now();
        monitor
            .record_latency_at(Duration::from_millis(5), false, start)
            .await;

        let snapshot = monitor
            .metrics_at(queue_stats(10, 0), start + Duration::from_secs(15))
            .await;
        assert_eq!(snapshot.health.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_health_degraded_on_failure_ratio() {
        let monitor = PipelineMonitor::new();
        let start = Instant::now();
        monitor
            .record_latency_at(Duration::from_millis(5), false, start)
            .await;

        // 2 failed / 10 completed = 20% > 10%
        let snapshot = monitor
            .metrics_at(queue_stats(10, 2), start + Duration::from_secs(1))
            .await;
        assert_eq!(snapshot.health.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_health_healthy_recent_completion_low_failures() {
        let monitor = PipelineMonitor::new();
        let start = Instant::now();
        monitor
            .record_latency_at(Duration::from_millis(5), false, start)
            .await;

        // 5s ago, 2% failure ratio
        let snapshot = monitor
            .metrics_at(queue_stats(100, 2), start + Duration::from_secs(5))
            .await;
        assert_eq!(snapshot.health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_throughput_windows_reset() {
        let monitor = PipelineMonitor::new();
        let start = Instant::now();
        for _ in 0..5 {
            monitor
                .record_latency_at(Duration::from_millis(1), false, start)
                .await;
        }

        let fresh = monitor.metrics_at(queue_stats(5, 0), start).await;
        assert_eq!(fresh.throughput.per_second, 5);
        assert_eq!(fresh.throughput.per_minute, 5);

        // Past the one-second window the per-second figure reads zero
        let later = monitor
            .metrics_at(queue_stats(5, 0), start + Duration::from_secs(2))
            .await;
        assert_eq!(later.throughput.per_second, 0);
        assert_eq!(later.throughput.per_minute, 5);
        assert_eq!(later.throughput.total, 5);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let monitor = PipelineMonitor::new();
        monitor.record_latency(Duration::from_millis(5), true).await;
        monitor.record_sync_failure().await;
        monitor.reset().await;

        let snapshot = monitor.metrics(empty_queue_stats()).await;
        assert_eq!(snapshot.latency.samples, 0);
        assert_eq!(snapshot.throughput.total, 0);
        assert_eq!(snapshot.sync.processed, 0);
        assert_eq!(snapshot.sync.failed, 0);
        assert!(snapshot.health.last_completed_secs_ago.is_none());
    }
}
