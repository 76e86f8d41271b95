use std::time::Duration;

use crate::utils::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct EnvVars {
    pub database_url: String,
    pub port: u16,
    // Alchemy upstream
    pub alchemy_api_key: String,
    pub alchemy_rpc_base_url: Option<String>, // Override JSON-RPC host for testing
    pub alchemy_prices_base_url: String,
    pub source_max_attempts: u32,
    pub source_backoff_base_ms: u64,
    pub source_request_timeout_seconds: u64,
    // Price cache
    pub price_cache_ttl_seconds: u64,
    pub price_cache_max_capacity: u64,
    // Backfill worker
    pub backfill_max_concurrent_jobs: usize,
    pub backfill_batch_size: usize,
    pub backfill_batch_delay_ms: u64,
    pub backfill_job_max_attempts: u32,
    pub backfill_job_backoff_ms: u64,
    pub backfill_job_retention_hours: u64,
    pub backfill_purge_interval_seconds: u64,
    // CORS configuration
    pub cors_allowed_origins: Vec<String>,
}

/// Settings for the price resolver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverSettings {
    pub cache_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Settings for the backfill runner and its job queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackfillSettings {
    pub max_concurrent_jobs: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub job_retry: RetryPolicy,
    pub job_retention: Duration,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            batch_size: 5,
            batch_delay: Duration::from_secs(1),
            job_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            job_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EnvVars {
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            cache_ttl: Duration::from_secs(self.price_cache_ttl_seconds),
        }
    }

    pub fn source_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.source_max_attempts,
            Duration::from_millis(self.source_backoff_base_ms),
        )
    }

    pub fn backfill_settings(&self) -> BackfillSettings {
        BackfillSettings {
            max_concurrent_jobs: self.backfill_max_concurrent_jobs.max(1),
            batch_size: self.backfill_batch_size.max(1),
            batch_delay: Duration::from_millis(self.backfill_batch_delay_ms),
            job_retry: RetryPolicy::new(
                self.backfill_job_max_attempts,
                Duration::from_millis(self.backfill_job_backoff_ms),
            ),
            job_retention: Duration::from_secs(self.backfill_job_retention_hours * 60 * 60),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for EnvVars {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL is not set"),
            port: env_or("PORT", 3002),
            alchemy_api_key: std::env::var("ALCHEMY_API_KEY")
                .expect("ALCHEMY_API_KEY is not set"),
            alchemy_rpc_base_url: std::env::var("ALCHEMY_RPC_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            alchemy_prices_base_url: std::env::var("ALCHEMY_PRICES_BASE_URL")
                .unwrap_or_else(|_| "https://api.g.alchemy.com/prices/v1".to_string()),
            source_max_attempts: env_or("SOURCE_MAX_ATTEMPTS", 3),
            source_backoff_base_ms: env_or("SOURCE_BACKOFF_BASE_MS", 200),
            source_request_timeout_seconds: env_or("SOURCE_REQUEST_TIMEOUT_SECONDS", 15),
            price_cache_ttl_seconds: env_or("PRICE_CACHE_TTL_SECONDS", 300),
            price_cache_max_capacity: env_or("PRICE_CACHE_MAX_CAPACITY", 10_000),
            backfill_max_concurrent_jobs: env_or("BACKFILL_MAX_CONCURRENT_JOBS", 2),
            backfill_batch_size: env_or("BACKFILL_BATCH_SIZE", 5),
            backfill_batch_delay_ms: env_or("BACKFILL_BATCH_DELAY_MS", 1_000),
            backfill_job_max_attempts: env_or("BACKFILL_JOB_MAX_ATTEMPTS", 3),
            backfill_job_backoff_ms: env_or("BACKFILL_JOB_BACKOFF_MS", 2_000),
            backfill_job_retention_hours: env_or("BACKFILL_JOB_RETENTION_HOURS", 24),
            backfill_purge_interval_seconds: env_or("BACKFILL_PURGE_INTERVAL_SECONDS", 3_600),
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001,http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}
