use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub dedup: DedupConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in the x-webhook-secret header
    pub webhook_secret: String,
    /// Token for the admin surface; admin routes reject when unset
    pub admin_token: Option<String>,
    /// Grace period for draining in-flight jobs on shutdown (seconds)
    pub shutdown_grace_secs: u64,
    /// Housekeeping tick for window/TTL/old-job cleanup (seconds)
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// TTL for generic events in seconds
    pub ttl_secs: u64,
    /// Shorter TTL for presence/connection-style events in seconds
    pub short_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            short_ttl_secs: 5,
            max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds
    pub backoff_base_ms: u64,
    /// Retry backoff cap in milliseconds
    pub backoff_max_ms: u64,
    /// Per-job processor timeout in seconds
    pub job_timeout_secs: u64,
    /// Coalescing window for batchable events in milliseconds
    pub batch_window_ms: u64,
    pub max_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            job_timeout_secs: 30,
            batch_window_ms: 50,
            max_batch_size: 20,
        }
    }
}

impl QueueConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PORT")
                    .unwrap_or_else(|_| "8090".to_string())
                    .parse()
                    .context("PORT must be a valid port number")?,
                webhook_secret: std::env::var("WEBHOOK_SHARED_SECRET")
                    .unwrap_or_else(|_| "changeme".to_string()),
                admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
                shutdown_grace_secs: std::env::var("SHUTDOWN_GRACE_SECS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()?,
                cleanup_interval_secs: std::env::var("CLEANUP_INTERVAL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
            rate_limit: RateLimitConfig {
                max_requests: std::env::var("RATE_LIMIT_MAX_REQUESTS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                window_seconds: std::env::var("RATE_LIMIT_WINDOW_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
            dedup: DedupConfig {
                ttl_secs: std::env::var("DEDUP_TTL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                short_ttl_secs: std::env::var("DEDUP_SHORT_TTL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                max_entries: std::env::var("DEDUP_MAX_ENTRIES")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
            },
            queue: QueueConfig {
                max_concurrent: std::env::var("QUEUE_MAX_CONCURRENT")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                max_retries: std::env::var("QUEUE_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                backoff_base_ms: std::env::var("QUEUE_BACKOFF_BASE_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
                backoff_max_ms: std::env::var("QUEUE_BACKOFF_MAX_MS")
                    .unwrap_or_else(|_| "60000".to_string())
                    .parse()?,
                job_timeout_secs: std::env::var("QUEUE_JOB_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                batch_window_ms: std::env::var("QUEUE_BATCH_WINDOW_MS")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()?,
                max_batch_size: std::env::var("QUEUE_MAX_BATCH_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
            },
        })
    }
}
