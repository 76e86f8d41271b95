use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache as MokaCache;
use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::services::types::{Network, TokenAddress};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Fast key-value layer with per-entry TTL, sitting in front of the price store.
///
/// Implementations may be remote and therefore fallible; callers on the hot
/// path treat any error as a miss.
#[async_trait]
pub trait PriceCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Clone)]
struct CachedValue {
    value: String,
    ttl: Duration,
}

/// Expire each entry after the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process price cache backed by moka
#[derive(Clone)]
pub struct MokaPriceCache {
    inner: MokaCache<String, CachedValue>,
}

impl MokaPriceCache {
    /// Create a cache holding at most `max_capacity` entries
    pub fn new(max_capacity: u64) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { inner }
    }
}

impl Default for MokaPriceCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl PriceCache for MokaPriceCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.inner.get(key).await.map(|cached| cached.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.inner
            .insert(key.to_string(), CachedValue { value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}

/// Helper to build consistent cache keys across the application
pub struct CacheKey {
    namespace: String,
    parts: Vec<String>,
}

impl CacheKey {
    /// Create a new cache key with a namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            parts: Vec::new(),
        }
    }

    /// Add a part to the cache key
    pub fn with(mut self, part: impl Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    /// Build the final cache key string
    pub fn build(self) -> String {
        if self.parts.is_empty() {
            self.namespace
        } else {
            format!("{}:{}", self.namespace, self.parts.join(":"))
        }
    }

    /// `price:{token}:{network}:{timestamp}`
    pub fn price(token: &TokenAddress, network: Network, timestamp: i64) -> String {
        Self::new("price")
            .with(token)
            .with(network)
            .with(timestamp)
            .build()
    }
}
