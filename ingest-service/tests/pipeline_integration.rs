/// End-to-end tests over the admission pipeline: HTTP intake through
/// rate limiting, deduplication, and the job queue.
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{test, web, App};
use serde_json::json;

use ingest_service::config::{Config, DedupConfig, QueueConfig, RateLimitConfig, ServerConfig};
use ingest_service::handlers::{self, AppState};
use ingest_service::services::processor::LoggingProcessor;
use ingest_service::{DeduplicationCache, PipelineMonitor, RateLimiter, WebhookJobQueue};

const SECRET: &str = "test-secret";
const ADMIN: &str = "admin-secret";

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            webhook_secret: SECRET.to_string(),
            admin_token: Some(ADMIN.to_string()),
            shutdown_grace_secs: 1,
            cleanup_interval_secs: 60,
        },
        rate_limit: RateLimitConfig {
            max_requests: 100,
            window_seconds: 60,
        },
        dedup: DedupConfig::default(),
        queue: QueueConfig {
            backoff_base_ms: 10,
            backoff_max_ms: 50,
            ..QueueConfig::default()
        },
    }
}

fn build_state(config: Config) -> (web::Data<AppState>, Arc<WebhookJobQueue>) {
    let monitor = Arc::new(PipelineMonitor::new());
    let queue = WebhookJobQueue::new(
        config.queue.clone(),
        Arc::new(LoggingProcessor),
        Arc::clone(&monitor),
    );
    let _dispatcher = queue.start();

    let state = web::Data::new(AppState {
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
        dedup: Arc::new(DeduplicationCache::new(config.dedup.clone())),
        queue: Arc::clone(&queue),
        monitor,
        config: Arc::new(config),
    });
    (state, queue)
}

async fn wait_for<F, Fut>(mut cond: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[actix_web::test]
async fn test_webhook_requires_shared_secret() {
    let (state, _queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .set_json(json!({"event": "messages.upsert", "payload": {"key": {"id": "m1"}}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .insert_header(("x-webhook-secret", SECRET))
        .set_json(json!({"event": "messages.upsert", "payload": {"key": {"id": "m1"}}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
}

#[actix_web::test]
async fn test_malformed_event_is_rejected() {
    let (state, _queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .insert_header(("x-webhook-secret", SECRET))
        .set_json(json!({"event": "  ", "payload": {}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_duplicate_event_is_filtered_not_enqueued() {
    let (state, queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(handlers::register_routes),
    )
    .await;

    let body = json!({"event": "connection.update", "payload": {"connection": "open"}});

    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .insert_header(("x-webhook-secret", SECRET))
        .set_json(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);

    // Identical event inside the TTL comes back 200 with duplicate=true
    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .insert_header(("x-webhook-secret", SECRET))
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let parsed: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(parsed["data"]["duplicate"], json!(true));

    assert_eq!(state.dedup.stats().await.total_filtered, 1);
    assert!(
        wait_for(
            || async { queue.stats().await.completed == 1 },
            Duration::from_secs(5)
        )
        .await
    );
}

#[actix_web::test]
async fn test_rate_limit_boundary() {
    let mut config = test_config();
    config.rate_limit.max_requests = 100;
    let (state, _queue) = build_state(config);
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let mut last_remaining = u64::MAX;
    for i in 0..100 {
        // Unique payloads keep dedup out of the picture
        let req = test::TestRequest::post()
            .uri("/webhook/primary")
            .insert_header(("x-webhook-secret", SECRET))
            .set_json(json!({"event": "messages.upsert", "payload": {"key": {"id": format!("m{i}")}}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202, "request {} should be admitted", i + 1);
        let parsed: serde_json::Value = test::read_body_json(resp).await;
        last_remaining = parsed["data"]["remaining"].as_u64().unwrap();
    }
    assert_eq!(last_remaining, 0);

    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .insert_header(("x-webhook-secret", SECRET))
        .set_json(json!({"event": "messages.upsert", "payload": {"key": {"id": "m100"}}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
    let retry_after = resp
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap();
    assert!(retry_after > 0);
}

#[actix_web::test]
async fn test_burst_drains_through_queue() {
    let (state, queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    for i in 0..10 {
        let req = test::TestRequest::post()
            .uri("/webhook/primary")
            .insert_header(("x-webhook-secret", SECRET))
            .set_json(json!({"event": "messages.upsert", "payload": {"key": {"id": format!("burst{i}")}}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);
    }

    assert!(
        wait_for(
            || async {
                let s = queue.stats().await;
                s.completed == 10 && s.pending == 0 && s.processing == 0
            },
            Duration::from_secs(5)
        )
        .await
    );
}

#[actix_web::test]
async fn test_health_endpoint() {
    let (state, _queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let parsed: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(parsed["status"], json!("healthy"));
}

#[actix_web::test]
async fn test_admin_routes_require_token() {
    let (state, _queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/pipeline/status")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/pipeline/status")
        .insert_header(("x-admin-token", ADMIN))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn test_pipeline_status_includes_rate_windows() {
    let (state, _queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .insert_header(("x-webhook-secret", SECRET))
        .set_json(json!({"event": "messages.upsert", "payload": {"key": {"id": "rl1"}}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/pipeline/status")
        .insert_header(("x-admin-token", ADMIN))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let parsed: serde_json::Value = test::read_body_json(resp).await;
    let rate_limit = &parsed["data"]["rate_limit"];
    assert_eq!(rate_limit["tracked_sources"], json!(1));
    let window = &rate_limit["sources"][0];
    assert_eq!(window["source"], json!("primary"));
    assert_eq!(window["requests"], json!(1));
    assert_eq!(window["remaining"], json!(99));
    assert_eq!(window["limit"], json!(100));
    assert!(window["reset_in_secs"].as_u64().unwrap() > 0);
}

#[actix_web::test]
async fn test_admin_rejected_when_no_token_configured() {
    let mut config = test_config();
    config.server.admin_token = None;
    let (state, _queue) = build_state(config);
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/queue/retry-failed")
        .insert_header(("x-admin-token", ADMIN))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_admin_pipeline_metrics_shape() {
    let (state, queue) = build_state(test_config());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/webhook/primary")
        .insert_header(("x-webhook-secret", SECRET))
        .set_json(json!({"event": "messages.upsert", "payload": {"key": {"id": "metrics1"}}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
    assert!(
        wait_for(
            || async { queue.stats().await.completed == 1 },
            Duration::from_secs(5)
        )
        .await
    );

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/pipeline/metrics")
        .insert_header(("x-admin-token", ADMIN))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let parsed: serde_json::Value = test::read_body_json(resp).await;
    let data = &parsed["data"];
    assert_eq!(data["queue"]["completed"], json!(1));
    assert_eq!(data["throughput"]["total"], json!(1));
    assert!(data["latency"]["samples"].as_u64().unwrap() >= 1);
    assert_eq!(data["health"]["status"], json!("healthy"));
}
