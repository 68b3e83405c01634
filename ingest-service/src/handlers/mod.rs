//! HTTP surface of the ingest service:
//! - webhook intake (authenticated by a shared secret)
//! - health and Prometheus endpoints
//! - token-guarded admin operations over the pipeline

pub mod admin;
pub mod webhook;

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::services::dedup_cache::DeduplicationCache;
use crate::services::job_queue::WebhookJobQueue;
use crate::services::monitor::PipelineMonitor;
use crate::services::rate_limiter::RateLimiter;

/// Shared handler state, one instance per server.
pub struct AppState {
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub dedup: Arc<DeduplicationCache>,
    pub queue: Arc<WebhookJobQueue>,
    pub monitor: Arc<PipelineMonitor>,
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

pub fn register_routes(cfg: &mut actix_web::web::ServiceConfig) {
    webhook::register_routes(cfg);
    admin::register_routes(cfg);
}
