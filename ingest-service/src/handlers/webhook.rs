use std::time::Instant;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics;
use crate::models::WebhookEvent;
use crate::services::monitor::HealthStatus;

use super::{ApiResponse, AppState};

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhook/{source}", web::post().to(ingest_for_source))
        .route("/webhook", web::post().to(ingest))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(crate::metrics::serve_metrics));
}

#[derive(Debug, Serialize)]
struct IngestAccepted {
    job_id: Uuid,
    remaining: u32,
}

#[derive(Debug, Serialize)]
struct IngestFiltered {
    duplicate: bool,
}

/// Webhook intake with the source taken from the path.
///
/// POST /webhook/{source}
async fn ingest_for_source(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<WebhookEvent>,
) -> Result<HttpResponse, AppError> {
    let mut event = body.into_inner();
    event.source = path.into_inner();
    admit(&state, &req, event).await
}

/// Webhook intake with the source taken from the event body.
///
/// POST /webhook
async fn ingest(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<WebhookEvent>,
) -> Result<HttpResponse, AppError> {
    admit(&state, &req, body.into_inner()).await
}

/// Admission pipeline: secret, shape, rate limit, dedup, enqueue.
async fn admit(
    state: &AppState,
    req: &HttpRequest,
    event: WebhookEvent,
) -> Result<HttpResponse, AppError> {
    let started = Instant::now();

    if !has_valid_secret(req, &state.config.server.webhook_secret) {
        return Err(AppError::Unauthorized);
    }

    if let Err(reason) = event.validate() {
        metrics::observe_event("malformed");
        state.monitor.record_sync_failure().await;
        return Err(AppError::BadRequest(reason));
    }

    let decision = state.rate_limiter.admit(&event.source).await;
    if !decision.allowed {
        metrics::observe_event("rate_limited");
        return Err(AppError::RateLimited {
            source: event.source,
            retry_after_secs: decision.retry_after.as_secs().max(1),
        });
    }

    if !state
        .dedup
        .should_process(&event.event_type, &event.source, &event.payload)
        .await
    {
        metrics::observe_event("duplicate");
        debug!(
            event_type = %event.event_type,
            source = %event.source,
            "duplicate event filtered"
        );
        state.monitor.record_latency(started.elapsed(), true).await;
        return Ok(HttpResponse::Ok().json(ApiResponse::ok(IngestFiltered { duplicate: true })));
    }

    let job_id = state.queue.enqueue(event).await;
    metrics::observe_event("admitted");

    Ok(HttpResponse::Accepted().json(ApiResponse::ok(IngestAccepted {
        job_id,
        remaining: decision.remaining,
    })))
}

fn has_valid_secret(req: &HttpRequest, secret: &str) -> bool {
    req.headers()
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == secret)
        .unwrap_or(false)
}

/// Liveness plus pipeline verdict. Critical reports 503 so load
/// balancers can pull the instance.
///
/// GET /health
async fn health(state: web::Data<AppState>) -> HttpResponse {
    let queue = state.queue.stats().await;
    let snapshot = state.monitor.metrics(queue).await;

    let body = serde_json::json!({
        "status": snapshot.health.status,
        "last_completed_secs_ago": snapshot.health.last_completed_secs_ago,
        "queue": {
            "pending": snapshot.queue.pending,
            "processing": snapshot.queue.processing,
        },
    });

    match snapshot.health.status {
        HealthStatus::Critical => {
            info!("health check reported critical");
            HttpResponse::ServiceUnavailable().json(body)
        }
        _ => HttpResponse::Ok().json(body),
    }
}
