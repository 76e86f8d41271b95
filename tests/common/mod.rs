#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use price_history_be::AppState;
use price_history_be::services::price_store::{PriceStore, SampleOrigin, StoreError};
use price_history_be::services::types::{NearestSamples, Network, PriceSample, TokenAddress};
use price_history_be::services::{OracleError, PriceOracle};
use price_history_be::utils::cache::{CacheError, PriceCache};
use price_history_be::utils::env::{BackfillSettings, ResolverSettings};
use price_history_be::utils::retry::RetryPolicy;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DAI: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";
pub const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
pub const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

pub fn token(address: &str) -> TokenAddress {
    address.parse().expect("valid test token")
}

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).expect("valid decimal")
}

/// Backfill settings without pauses so tests run fast
pub fn fast_backfill_settings() -> BackfillSettings {
    BackfillSettings {
        max_concurrent_jobs: 2,
        batch_size: 5,
        batch_delay: Duration::ZERO,
        job_retry: RetryPolicy::immediate(3),
        job_retention: Duration::from_secs(24 * 60 * 60),
    }
}

/// Wire an application state around in-memory collaborators
pub fn build_state(
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
    oracle: Arc<ScriptedOracle>,
) -> AppState {
    AppState::from_parts(
        store,
        cache,
        oracle,
        RetryPolicy::immediate(3),
        ResolverSettings::default(),
        fast_backfill_settings(),
    )
}

type SampleKey = (TokenAddress, Network, i64);

/// In-memory price store with call counters and an outage switch
#[derive(Default)]
pub struct MemoryStore {
    samples: Mutex<BTreeMap<SampleKey, (BigDecimal, SampleOrigin)>>,
    failing: AtomicBool,
    pub upserts: AtomicUsize,
    pub exact_reads: AtomicUsize,
    pub nearest_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, token: &TokenAddress, network: Network, timestamp: i64, price: &str) {
        self.samples.lock().unwrap().insert(
            (token.clone(), network, timestamp),
            (dec(price), SampleOrigin::Live),
        );
    }

    pub fn price_at(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Option<BigDecimal> {
        self.samples
            .lock()
            .unwrap()
            .get(&(token.clone(), network, timestamp))
            .map(|(price, _)| price.clone())
    }

    pub fn origin_at(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Option<SampleOrigin> {
        self.samples
            .lock()
            .unwrap()
            .get(&(token.clone(), network, timestamp))
            .map(|(_, origin)| *origin)
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn sample(key: &SampleKey, price: &BigDecimal) -> PriceSample {
        PriceSample {
            token: key.0.clone(),
            network: key.1,
            timestamp: key.2,
            price: price.clone(),
        }
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn upsert(&self, sample: &PriceSample, origin: SampleOrigin) -> Result<(), StoreError> {
        self.check()?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.samples.lock().unwrap().insert(
            (sample.token.clone(), sample.network, sample.timestamp),
            (sample.price.clone(), origin),
        );
        Ok(())
    }

    async fn get_exact(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<Option<PriceSample>, StoreError> {
        self.check()?;
        self.exact_reads.fetch_add(1, Ordering::SeqCst);
        let key = (token.clone(), network, timestamp);
        Ok(self
            .samples
            .lock()
            .unwrap()
            .get(&key)
            .map(|(price, _)| Self::sample(&key, price)))
    }

    async fn get_nearest(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<NearestSamples, StoreError> {
        self.check()?;
        self.nearest_reads.fetch_add(1, Ordering::SeqCst);
        let samples = self.samples.lock().unwrap();
        let lower = (token.clone(), network, i64::MIN);
        let upper = (token.clone(), network, i64::MAX);
        let target = (token.clone(), network, timestamp);

        let before = samples
            .range(lower..target.clone())
            .next_back()
            .map(|(key, (price, _))| Self::sample(key, price));
        let after = samples
            .range(target..=upper)
            .next()
            .map(|(key, (price, _))| Self::sample(key, price));

        Ok(NearestSamples { before, after })
    }

    async fn range(
        &self,
        token: &TokenAddress,
        network: Network,
        start: i64,
        end: i64,
    ) -> Result<Vec<PriceSample>, StoreError> {
        self.check()?;
        let samples = self.samples.lock().unwrap();
        Ok(samples
            .range((token.clone(), network, start)..=(token.clone(), network, end))
            .map(|(key, (price, _))| Self::sample(key, price))
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

/// In-memory cache with call counters and an outage switch
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("cache offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PriceCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Oracle answering from a fixed script, tracking calls and concurrency
#[derive(Default)]
pub struct ScriptedOracle {
    prices: HashMap<i64, BigDecimal>,
    default_price: Option<BigDecimal>,
    missing: HashSet<i64>,
    earliest: Option<i64>,
    earliest_failures: u32,
    earliest_delay: Duration,
    price_delay: Duration,
    pub price_calls: AtomicUsize,
    pub earliest_calls: AtomicU32,
    pub earliest_order: Mutex<Vec<TokenAddress>>,
    active_prices: AtomicUsize,
    pub max_active_prices: AtomicUsize,
    active_jobs: AtomicUsize,
    pub max_active_jobs: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, timestamp: i64, price: &str) -> Self {
        self.prices.insert(timestamp, dec(price));
        self
    }

    /// Price returned for any timestamp not scripted explicitly
    pub fn with_default_price(mut self, price: &str) -> Self {
        self.default_price = Some(dec(price));
        self
    }

    pub fn missing_at(mut self, timestamp: i64) -> Self {
        self.missing.insert(timestamp);
        self
    }

    pub fn with_earliest(mut self, timestamp: i64) -> Self {
        self.earliest = Some(timestamp);
        self
    }

    /// Fail the first `failures` earliest-activity calls with a rate limit
    pub fn with_earliest_failures(mut self, failures: u32) -> Self {
        self.earliest_failures = failures;
        self
    }

    pub fn with_earliest_delay(mut self, delay: Duration) -> Self {
        self.earliest_delay = delay;
        self
    }

    pub fn with_price_delay(mut self, delay: Duration) -> Self {
        self.price_delay = delay;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn enter(active: &AtomicUsize, max_active: &AtomicUsize) {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceOracle for ScriptedOracle {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_price(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<BigDecimal, OracleError> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        Self::enter(&self.active_prices, &self.max_active_prices);
        if !self.price_delay.is_zero() {
            tokio::time::sleep(self.price_delay).await;
        }
        self.active_prices.fetch_sub(1, Ordering::SeqCst);

        let price = if self.missing.contains(&timestamp) {
            None
        } else {
            self.prices
                .get(&timestamp)
                .or(self.default_price.as_ref())
                .cloned()
        };

        price.ok_or_else(|| OracleError::NoPriceData {
            token: token.clone(),
            network,
            timestamp,
        })
    }

    async fn fetch_earliest_activity(
        &self,
        token: &TokenAddress,
        network: Network,
    ) -> Result<i64, OracleError> {
        let call = self.earliest_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.earliest_order.lock().unwrap().push(token.clone());
        Self::enter(&self.active_jobs, &self.max_active_jobs);
        if !self.earliest_delay.is_zero() {
            tokio::time::sleep(self.earliest_delay).await;
        }
        self.active_jobs.fetch_sub(1, Ordering::SeqCst);

        if call <= self.earliest_failures {
            return Err(OracleError::RateLimited);
        }
        self.earliest.ok_or_else(|| OracleError::NoActivity {
            token: token.clone(),
            network,
        })
    }
}
