use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "ingest_service_events_total",
            "Inbound webhook events by admission outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create ingest_service_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register ingest_service_events_total");
    counter
});

static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "ingest_service_jobs_total",
            "Dispatched jobs by terminal result",
        ),
        &["result"],
    )
    .expect("failed to create ingest_service_jobs_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register ingest_service_jobs_total");
    counter
});

static JOB_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "ingest_service_job_duration_seconds",
            "Processing latency from enqueue to completion",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
        ]),
        &["event_type"],
    )
    .expect("failed to create ingest_service_job_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register ingest_service_job_duration_seconds");
    histogram
});

static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "ingest_service_queue_depth",
        "Jobs currently pending in the queue",
    )
    .expect("failed to create ingest_service_queue_depth");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register ingest_service_queue_depth");
    gauge
});

/// Admission outcomes: admitted, rate_limited, duplicate, malformed.
pub fn observe_event(outcome: &str) {
    EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Terminal job results: completed, failed, retried.
pub fn observe_job(result: &str) {
    JOBS_TOTAL.with_label_values(&[result]).inc();
}

pub fn observe_job_duration(event_type: &str, elapsed: Duration) {
    JOB_DURATION_SECONDS
        .with_label_values(&[event_type])
        .observe(elapsed.as_secs_f64());
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
