/// Priority job queue with opportunistic batching, bounded concurrency,
/// and retry with adaptive backoff.
///
/// Admitted events become jobs. A dispatch loop pulls the highest-priority
/// ready work (FIFO within a priority), coalesces batchable same-type
/// same-source jobs inside a short window, and hands each unit to the
/// processor under a timeout while a semaphore caps concurrent executions.
/// Failed attempts re-enter the pending set after an exponential delay
/// scaled by a global multiplier that reacts to downstream rate limiting.
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use resilience::{with_timeout, BackoffSchedule, Deadline};

use crate::config::QueueConfig;
use crate::metrics;
use crate::models::{Job, JobState, WebhookEvent};

use super::monitor::PipelineMonitor;
use super::processor::{EventProcessor, WorkUnit};

/// Ceiling for retry priority boosts: boosted retries must stay below
/// fresh connection-state work.
const RETRY_PRIORITY_CEILING: u8 = 195;

/// Multiplier bounds for the global backoff scale.
const MAX_BACKOFF_MULTIPLIER: f64 = 32.0;

/// Healthy completions required before the multiplier decays one step.
const DECAY_AFTER_SUCCESSES: u32 = 10;

/// Priority derived from the event type: state transitions outrank
/// routine list refreshes.
pub fn priority_for(event_type: &str) -> u8 {
    match event_type {
        "connection.update" => 200,
        "messages.update" => 180,
        "messages.upsert" => 160,
        "presence.update" => 120,
        "chats.upsert" | "chats.update" | "contacts.upsert" | "contacts.update" => 100,
        _ => 128,
    }
}

/// Batching applies only to event types whose downstream writes coalesce
/// well (list refreshes, status updates). Message upserts and connection
/// changes are always dispatched individually.
pub fn is_batchable(event_type: &str) -> bool {
    matches!(
        event_type,
        "chats.upsert" | "chats.update" | "contacts.upsert" | "contacts.update" | "messages.update"
    )
}

struct ReadyItem {
    priority: u8,
    seq: u64,
    unit: WorkUnit,
}

impl Eq for ReadyItem {}

impl PartialEq for ReadyItem {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for ReadyItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a priority, earlier seq first
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

impl PartialOrd for ReadyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct DelayedJob {
    eligible_at: Instant,
    job: Job,
}

struct PendingBatch {
    jobs: Vec<Job>,
    opened_at: Instant,
}

#[derive(Default)]
struct QueueState {
    seq: u64,
    ready: BinaryHeap<ReadyItem>,
    delayed: Vec<DelayedJob>,
    batches: HashMap<(String, String), PendingBatch>,
    terminal: HashMap<Uuid, Job>,
    processing: usize,
    total_enqueued: u64,
    completed: u64,
    failed: u64,
    backoff_multiplier: f64,
    healthy_streak: u32,
}

impl QueueState {
    fn push_ready(&mut self, priority: u8, unit: WorkUnit) {
        self.seq += 1;
        let seq = self.seq;
        self.ready.push(ReadyItem {
            priority,
            seq,
            unit,
        });
    }

    fn pending_jobs(&self) -> usize {
        let ready: usize = self.ready.iter().map(|i| i.unit.len()).sum();
        let batched: usize = self.batches.values().map(|b| b.jobs.len()).sum();
        ready + batched + self.delayed.len()
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: u64,
    pub failed: u64,
    pub queue_length: usize,
    pub pending_batches: usize,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub event_type: String,
    pub source: String,
    pub size: usize,
    pub age_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedStatus {
    pub stats: QueueStats,
    pub delayed_retries: usize,
    pub terminal_jobs: usize,
    pub batches: Vec<BatchStatus>,
}

pub struct WebhookJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    semaphore: Arc<Semaphore>,
    processor: Arc<dyn EventProcessor>,
    monitor: Arc<PipelineMonitor>,
    config: QueueConfig,
    schedule: BackoffSchedule,
    shutting_down: AtomicBool,
}

impl WebhookJobQueue {
    pub fn new(
        config: QueueConfig,
        processor: Arc<dyn EventProcessor>,
        monitor: Arc<PipelineMonitor>,
    ) -> Arc<Self> {
        let schedule = BackoffSchedule::builder()
            .initial(Duration::from_millis(config.backoff_base_ms))
            .max(Duration::from_millis(config.backoff_max_ms))
            .jitter(true)
            .build();

        Arc::new(Self {
            state: Mutex::new(QueueState {
                backoff_multiplier: 1.0,
                ..QueueState::default()
            }),
            notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            processor,
            monitor,
            config,
            schedule,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Spawn the dispatch loop. Call once after construction.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.dispatch_loop().await })
    }

    /// Accept an admitted event. Fire-and-forget: appends in memory and
    /// returns the job id immediately.
    pub async fn enqueue(&self, event: WebhookEvent) -> Uuid {
        let priority = priority_for(&event.event_type);
        let job = Job::new(event, priority);
        let job_id = job.id;

        let pending = {
            let mut state = self.state.lock().await;
            state.total_enqueued += 1;

            if is_batchable(&job.event_type) {
                let key = (job.event_type.clone(), job.source.clone());
                let now = Instant::now();
                // A batch past its coalescing window no longer accepts
                // appends, even if the dispatcher has not flushed it yet
                // (all workers may be busy). Close it and open a fresh one.
                let stale = state.batches.get(&key).is_some_and(|b| {
                    now.duration_since(b.opened_at) >= self.config.batch_window()
                });
                if stale {
                    if let Some(closed) = state.batches.remove(&key) {
                        Self::push_flushed(&mut state, closed);
                    }
                }
                let batch = state
                    .batches
                    .entry(key.clone())
                    .or_insert_with(|| PendingBatch {
                        jobs: Vec::new(),
                        opened_at: now,
                    });
                batch.jobs.push(job);
                if batch.jobs.len() >= self.config.max_batch_size {
                    if let Some(full) = state.batches.remove(&key) {
                        Self::push_flushed(&mut state, full);
                    }
                }
            } else {
                state.push_ready(priority, WorkUnit::Single(job));
            }
            state.pending_jobs()
        };

        metrics::set_queue_depth(pending);
        self.notify.notify_one();

        tracing::debug!(job_id = %job_id, pending, "job enqueued");
        job_id
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        Self::stats_of(&state)
    }

    fn stats_of(state: &QueueState) -> QueueStats {
        QueueStats {
            pending: state.pending_jobs(),
            processing: state.processing,
            completed: state.completed,
            failed: state.failed,
            queue_length: state.ready.len(),
            pending_batches: state.batches.len(),
            backoff_multiplier: state.backoff_multiplier,
        }
    }

    pub async fn detailed_status(&self) -> DetailedStatus {
        let state = self.state.lock().await;
        let now = Instant::now();
        DetailedStatus {
            stats: Self::stats_of(&state),
            delayed_retries: state.delayed.len(),
            terminal_jobs: state.terminal.len(),
            batches: state
                .batches
                .iter()
                .map(|((event_type, source), batch)| BatchStatus {
                    event_type: event_type.clone(),
                    source: source.clone(),
                    size: batch.jobs.len(),
                    age_ms: now.duration_since(batch.opened_at).as_millis() as u64,
                })
                .collect(),
        }
    }

    /// Re-enqueue every terminally failed job once, with a fresh attempt
    /// budget. Administrative recovery only; never called automatically.
    pub async fn retry_failed_jobs(&self) -> usize {
        let mut state = self.state.lock().await;
        let failed_ids: Vec<Uuid> = state
            .terminal
            .iter()
            .filter(|(_, job)| job.state == JobState::Failed)
            .map(|(id, _)| *id)
            .collect();

        for id in &failed_ids {
            if let Some(mut job) = state.terminal.remove(id) {
                job.state = JobState::Pending;
                job.attempts = 0;
                job.finished_at = None;
                let priority = job.priority;
                state.push_ready(priority, WorkUnit::Single(job));
            }
        }
        drop(state);

        if !failed_ids.is_empty() {
            tracing::info!(count = failed_ids.len(), "re-enqueued failed jobs");
            self.notify.notify_one();
        }
        failed_ids.len()
    }

    /// Purge terminal jobs older than the given age. Returns the number
    /// removed; a second call with no new terminals is a no-op.
    pub async fn clear_old_jobs(&self, older_than_hours: u64) -> usize {
        let cutoff = Duration::from_secs(older_than_hours * 3600);
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let before = state.terminal.len();
        state.terminal.retain(|_, job| match job.finished_at {
            Some(finished) => now.duration_since(finished) < cutoff,
            None => true,
        });
        before - state.terminal.len()
    }

    /// Stop pulling new work and wait up to `grace` for in-flight jobs.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, AtomicOrdering::SeqCst);
        self.notify.notify_waiters();

        let deadline = Deadline::after(grace);
        loop {
            let in_flight = self.state.lock().await.processing;
            if in_flight == 0 {
                tracing::info!("queue drained");
                return;
            }
            if deadline.expired() {
                tracing::warn!(in_flight, "shutdown grace expired with jobs in flight");
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            "dispatch loop started"
        );

        'outer: loop {
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                break;
            }

            // Hold a worker slot before pulling work so the queue keeps
            // priority order even under slot contention.
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                break;
            };

            let item = loop {
                if self.shutting_down.load(AtomicOrdering::SeqCst) {
                    break 'outer;
                }

                let popped = {
                    let mut state = self.state.lock().await;
                    let now = Instant::now();
                    Self::promote_delayed(&mut state, now);
                    self.flush_due_batches(&mut state, now);
                    state.ready.pop()
                };
                if let Some(item) = popped {
                    break item;
                }

                let sleep_for = {
                    let state = self.state.lock().await;
                    self.next_deadline(&state)
                        .unwrap_or(Duration::from_millis(100))
                        .max(Duration::from_millis(1))
                };
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            };

            let unit = self.mark_started(item.unit).await;
            let queue = Arc::clone(&self);
            tokio::spawn(async move { queue.run_unit(unit, permit).await });
        }

        tracing::info!("dispatch loop stopped");
    }

    async fn mark_started(&self, unit: WorkUnit) -> WorkUnit {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.processing += unit.len();
        drop(state);

        let start = |mut job: Job| {
            job.state = JobState::Processing;
            job.started_at = Some(now);
            job
        };
        match unit {
            WorkUnit::Single(job) => WorkUnit::Single(start(job)),
            WorkUnit::Batch(jobs) => WorkUnit::Batch(jobs.into_iter().map(start).collect()),
        }
    }

    async fn run_unit(self: Arc<Self>, unit: WorkUnit, permit: OwnedSemaphorePermit) {
        // The processor runs in its own task so a panicking implementation
        // surfaces as a JoinError and takes the normal failure path instead
        // of leaking the unit's `processing` count.
        let processor = Arc::clone(&self.processor);
        let attempt_unit = unit.clone();
        let mut attempt = tokio::spawn(async move { processor.process(&attempt_unit).await });

        match with_timeout(self.config.job_timeout(), &mut attempt).await {
            Ok(Ok(Ok(()))) => self.complete_unit(unit).await,
            Ok(Ok(Err(err))) => {
                let retryable = err.is_retryable();
                let rate_limited = err.is_rate_limited();
                self.fail_unit(unit, retryable, rate_limited, err.to_string())
                    .await;
            }
            Ok(Err(join_err)) => {
                self.fail_unit(unit, true, false, format!("processor panicked: {join_err}"))
                    .await;
            }
            // A timed-out attempt is an ordinary retryable failure
            Err(err) => {
                attempt.abort();
                self.fail_unit(unit, true, false, err.to_string()).await;
            }
        }

        drop(permit);
        self.notify.notify_one();
    }

    async fn complete_unit(&self, unit: WorkUnit) {
        let now = Instant::now();
        let count = unit.len();
        let mut latencies: Vec<(String, Duration)> = Vec::with_capacity(count);

        let pending = {
            let mut state = self.state.lock().await;
            for mut job in unit_into_jobs(unit) {
                job.state = JobState::Completed;
                job.finished_at = Some(now);
                latencies.push((
                    job.event_type.clone(),
                    now.duration_since(job.enqueued_at),
                ));
                state.terminal.insert(job.id, job);
            }
            state.processing -= count;
            state.completed += count as u64;

            state.healthy_streak += 1;
            if state.healthy_streak >= DECAY_AFTER_SUCCESSES && state.backoff_multiplier > 1.0 {
                state.backoff_multiplier = (state.backoff_multiplier / 2.0).max(1.0);
                state.healthy_streak = 0;
                tracing::debug!(
                    multiplier = state.backoff_multiplier,
                    "backoff multiplier decayed"
                );
            }
            state.pending_jobs()
        };

        for (event_type, latency) in latencies {
            self.monitor.record_latency(latency, false).await;
            metrics::observe_job("completed");
            metrics::observe_job_duration(&event_type, latency);
        }
        metrics::set_queue_depth(pending);
    }

    async fn fail_unit(&self, unit: WorkUnit, retryable: bool, rate_limited: bool, reason: String) {
        let now = Instant::now();
        let count = unit.len();
        let event_type = unit.event_type().to_string();
        let source = unit.source().to_string();

        let mut state = self.state.lock().await;

        if rate_limited {
            state.backoff_multiplier =
                (state.backoff_multiplier * 2.0).min(MAX_BACKOFF_MULTIPLIER);
            state.healthy_streak = 0;
            tracing::warn!(
                multiplier = state.backoff_multiplier,
                "downstream rate limit, raising global backoff"
            );
        }
        let multiplier = state.backoff_multiplier;

        let mut retried = 0usize;
        let mut exhausted = 0usize;
        for mut job in unit_into_jobs(unit) {
            job.attempts += 1;
            if retryable && job.attempts <= self.config.max_retries {
                job.state = JobState::Pending;
                // Boost enough to avoid starvation, never past fresh
                // connection-state work
                job.priority = job.priority.saturating_add(1).min(RETRY_PRIORITY_CEILING);
                let delay = self.schedule.delay_for(job.attempts, multiplier);
                state.delayed.push(DelayedJob {
                    eligible_at: now + delay,
                    job,
                });
                retried += 1;
                metrics::observe_job("retried");
            } else {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                state.terminal.insert(job.id, job);
                state.failed += 1;
                exhausted += 1;
                metrics::observe_job("failed");
            }
        }
        state.processing -= count;
        let pending = state.pending_jobs();
        drop(state);

        metrics::set_queue_depth(pending);
        tracing::warn!(
            event_type = %event_type,
            source = %source,
            retried,
            exhausted,
            %reason,
            "work unit failed"
        );
    }

    fn promote_delayed(state: &mut QueueState, now: Instant) {
        let mut i = 0;
        while i < state.delayed.len() {
            if state.delayed[i].eligible_at <= now {
                let entry = state.delayed.swap_remove(i);
                let priority = entry.job.priority;
                state.push_ready(priority, WorkUnit::Single(entry.job));
            } else {
                i += 1;
            }
        }
    }

    fn flush_due_batches(&self, state: &mut QueueState, now: Instant) {
        let window = self.config.batch_window();
        let due: Vec<(String, String)> = state
            .batches
            .iter()
            .filter(|(_, batch)| {
                now.duration_since(batch.opened_at) >= window
                    || batch.jobs.len() >= self.config.max_batch_size
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            if let Some(batch) = state.batches.remove(&key) {
                Self::push_flushed(state, batch);
            }
        }
    }

    fn push_flushed(state: &mut QueueState, batch: PendingBatch) {
        let mut jobs = batch.jobs;
        if jobs.is_empty() {
            return;
        }
        let priority = priority_for(&jobs[0].event_type);
        let unit = if jobs.len() == 1 {
            WorkUnit::Single(jobs.remove(0))
        } else {
            WorkUnit::Batch(jobs)
        };
        state.push_ready(priority, unit);
    }

    fn next_deadline(&self, state: &QueueState) -> Option<Duration> {
        let now = Instant::now();
        let window = self.config.batch_window();

        let next_delayed = state
            .delayed
            .iter()
            .map(|d| d.eligible_at)
            .min()
            .map(|at| at.saturating_duration_since(now));
        let next_batch = state
            .batches
            .values()
            .map(|b| b.opened_at + window)
            .min()
            .map(|at| at.saturating_duration_since(now));

        match (next_delayed, next_batch) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

fn unit_into_jobs(unit: WorkUnit) -> Vec<Job> {
    match unit {
        WorkUnit::Single(job) => vec![job],
        WorkUnit::Batch(jobs) => jobs,
    }
}
