pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

pub use error::{AppError, Result};
pub use services::dedup_cache::DeduplicationCache;
pub use services::job_queue::WebhookJobQueue;
pub use services::monitor::PipelineMonitor;
pub use services::processor::{EventProcessor, ProcessingError, WorkUnit};
pub use services::rate_limiter::RateLimiter;
