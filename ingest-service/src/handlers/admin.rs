use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::info;

use super::{ApiResponse, AppState};

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/admin")
            .route("/pipeline/status", web::get().to(pipeline_status))
            .route("/pipeline/metrics", web::get().to(pipeline_metrics))
            .route("/queue/stats", web::get().to(queue_stats))
            .route("/queue/retry-failed", web::post().to(retry_failed))
            .route("/queue/clear-old", web::post().to(clear_old))
            .route("/dedup/stats", web::get().to(dedup_stats))
            .route("/dedup/entries", web::get().to(dedup_entries))
            .route("/dedup/reset-stats", web::post().to(dedup_reset_stats))
            .route("/dedup/clear", web::post().to(dedup_clear))
            .route("/monitor/reset", web::post().to(monitor_reset))
            .route("/rate-limit/{source}", web::get().to(rate_limit_status)),
    );
}

/// Admin access is denied outright when no token is configured.
fn has_admin_access(req: &HttpRequest, state: &AppState) -> bool {
    match state.config.server.admin_token.as_deref() {
        Some(token) if !token.is_empty() => req
            .headers()
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == token)
            .unwrap_or(false),
        _ => false,
    }
}

/// Combined view over queue, rate limiter, and dedup cache.
///
/// GET /api/v1/admin/pipeline/status
async fn pipeline_status(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }

    let queue = state.queue.detailed_status().await;
    let dedup = state.dedup.stats().await;
    let sources = state.rate_limiter.snapshot_all().await;

    HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "queue": queue,
        "dedup": dedup,
        "rate_limit": {
            "tracked_sources": sources.len(),
            "sources": sources,
        },
    })))
}

/// Full rolling telemetry snapshot.
///
/// GET /api/v1/admin/pipeline/metrics
async fn pipeline_metrics(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    let queue = state.queue.stats().await;
    let snapshot = state.monitor.metrics(queue).await;
    HttpResponse::Ok().json(ApiResponse::ok(snapshot))
}

/// Re-enqueue every terminally failed job with a fresh attempt budget.
///
/// POST /api/v1/admin/queue/retry-failed
async fn retry_failed(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    let retried = state.queue.retry_failed_jobs().await;
    info!(retried, "admin retry of failed jobs");
    HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "retried": retried })))
}

/// Point-in-time queue counters.
///
/// GET /api/v1/admin/queue/stats
async fn queue_stats(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    let stats = state.queue.stats().await;
    HttpResponse::Ok().json(ApiResponse::ok(stats))
}

#[derive(Debug, Deserialize)]
struct ClearOldRequest {
    older_than_hours: Option<u64>,
}

/// Purge terminal job records.
///
/// POST /api/v1/admin/queue/clear-old
async fn clear_old(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: Option<web::Json<ClearOldRequest>>,
) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    let hours = body
        .and_then(|b| b.older_than_hours)
        .unwrap_or(24);
    let removed = state.queue.clear_old_jobs(hours).await;
    info!(removed, hours, "admin purge of terminal jobs");
    HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "removed": removed })))
}

/// Dedup counters and filter rate.
///
/// GET /api/v1/admin/dedup/stats
async fn dedup_stats(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    let stats = state.dedup.stats().await;
    HttpResponse::Ok().json(ApiResponse::ok(stats))
}

/// Current dedup entries, most-filtered first.
///
/// GET /api/v1/admin/dedup/entries
async fn dedup_entries(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    let entries = state.dedup.cache_info().await;
    HttpResponse::Ok().json(ApiResponse::ok(entries))
}

/// Zero the checked/filtered counters, leaving entries intact.
///
/// POST /api/v1/admin/dedup/reset-stats
async fn dedup_reset_stats(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    state.dedup.reset_stats().await;
    HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "reset": true })))
}

/// Drop all fingerprints.
///
/// POST /api/v1/admin/dedup/clear
async fn dedup_clear(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    state.dedup.clear().await;
    info!("admin clear of dedup cache");
    HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "cleared": true })))
}

/// Reset rolling latency and throughput windows.
///
/// POST /api/v1/admin/monitor/reset
async fn monitor_reset(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    state.monitor.reset().await;
    info!("admin reset of pipeline monitor");
    HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "reset": true })))
}

/// Read-only rate window view for one source. Does not count as a request.
///
/// GET /api/v1/admin/rate-limit/{source}
async fn rate_limit_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    if !has_admin_access(&req, &state) {
        return HttpResponse::Unauthorized().finish();
    }
    let snapshot = state.rate_limiter.snapshot(&path.into_inner()).await;
    HttpResponse::Ok().json(ApiResponse::ok(snapshot))
}
