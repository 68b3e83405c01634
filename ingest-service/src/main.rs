use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest_service::config::Config;
use ingest_service::handlers::{self, AppState};
use ingest_service::services::processor::LoggingProcessor;
use ingest_service::{DeduplicationCache, PipelineMonitor, RateLimiter, WebhookJobQueue};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting webhook ingest service");

    let config = Arc::new(
        Config::from_env()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?,
    );

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let dedup = Arc::new(DeduplicationCache::new(config.dedup.clone()));
    let monitor = Arc::new(PipelineMonitor::new());
    let queue = WebhookJobQueue::new(
        config.queue.clone(),
        Arc::new(LoggingProcessor),
        Arc::clone(&monitor),
    );

    let dispatcher = queue.start();
    tracing::info!(
        max_concurrent = config.queue.max_concurrent,
        "dispatch loop running"
    );

    // Periodic housekeeping: expired rate windows, stale fingerprints,
    // aged terminal jobs
    let cleanup_limiter = Arc::clone(&rate_limiter);
    let cleanup_dedup = Arc::clone(&dedup);
    let cleanup_queue = Arc::clone(&queue);
    let cleanup_interval = Duration::from_secs(config.server.cleanup_interval_secs.max(1));
    let housekeeping = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cleanup_limiter.cleanup().await;
            cleanup_dedup.cleanup().await;
            let purged = cleanup_queue.clear_old_jobs(24).await;
            tracing::debug!(purged, "housekeeping pass complete");
        }
    });

    let state = web::Data::new(AppState {
        config: Arc::clone(&config),
        rate_limiter,
        dedup,
        queue: Arc::clone(&queue),
        monitor,
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(server_state.clone())
            .wrap(middleware::Logger::default())
            .configure(handlers::register_routes)
    })
    .bind(&addr)?
    .run()
    .await?;

    // Server stopped; drain in-flight jobs before exit
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    tracing::info!(grace_secs = grace.as_secs(), "draining job queue");
    state.queue.shutdown(grace).await;
    housekeeping.abort();
    dispatcher.abort();
    tracing::info!("shutdown complete");

    Ok(())
}
