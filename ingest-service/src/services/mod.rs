pub mod dedup_cache;
pub mod job_queue;
pub mod monitor;
pub mod processor;
pub mod rate_limiter;
