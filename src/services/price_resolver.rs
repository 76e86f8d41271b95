//! Price resolution with a fallback chain
//!
//! Tiers are tried strictly in order, stopping at the first hit:
//! 1. cache (`price:{token}:{network}:{timestamp}`)
//! 2. exact match in the price store
//! 3. live fetch from the price source
//! 4. linear interpolation between the nearest stored samples, fetching a
//!    synthetic bracket one day away for any missing side
//!
//! Fresh values are written through before returning so the next identical
//! query is a cache hit. Cache failures are treated as misses; store failures
//! propagate because the store is the authoritative layer under the cache.

use bigdecimal::BigDecimal;
use std::str::FromStr;
use std::sync::Arc;

use super::interpolation::interpolate;
use super::price_provider::OracleError;
use super::price_source::PriceSourceAdapter;
use super::price_store::{PriceStore, SampleOrigin, StoreError};
use super::types::{
    NearestSamples, Network, PricePoint, PriceQuery, PriceResult, PriceSample, PriceSource,
    SECONDS_PER_DAY, TokenAddress,
};
use crate::utils::cache::{CacheKey, PriceCache};
use crate::utils::env::ResolverSettings;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no price data available")]
    NoPriceData,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Machine-readable reason for API consumers
    pub fn reason_code(&self) -> &'static str {
        match self {
            ResolveError::NoPriceData => "no_price_data",
            ResolveError::Store(_) => "store_unavailable",
        }
    }
}

pub struct PriceResolver {
    cache: Arc<dyn PriceCache>,
    store: Arc<dyn PriceStore>,
    source: Arc<PriceSourceAdapter>,
    settings: ResolverSettings,
}

impl PriceResolver {
    pub fn new(
        cache: Arc<dyn PriceCache>,
        store: Arc<dyn PriceStore>,
        source: Arc<PriceSourceAdapter>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            cache,
            store,
            source,
            settings,
        }
    }

    /// Resolve the price of `query.token` at `query.timestamp`
    ///
    /// # Returns
    /// * `Ok(PriceResult)` - The price and the tier that produced it
    /// * `Err(ResolveError::NoPriceData)` - Every tier failed
    /// * `Err(ResolveError::Store)` - The store could not be read or written
    pub async fn resolve(&self, query: &PriceQuery) -> Result<PriceResult, ResolveError> {
        let PriceQuery {
            token,
            network,
            timestamp,
        } = query;
        let (network, timestamp) = (*network, *timestamp);
        let cache_key = CacheKey::price(token, network, timestamp);

        if let Some(price) = self.cache_lookup(&cache_key).await {
            log::debug!("Cache hit for {}", cache_key);
            return Ok(PriceResult {
                price,
                source: PriceSource::Cache,
            });
        }

        if let Some(sample) = self.store.get_exact(token, network, timestamp).await? {
            log::debug!("Store hit for {}", cache_key);
            self.cache_write(&cache_key, &sample.price).await;
            return Ok(PriceResult {
                price: sample.price,
                source: PriceSource::Store,
            });
        }

        match self.source.fetch_price(token, network, timestamp).await {
            Ok(price) => {
                log::debug!("Live price for {}: {}", cache_key, price);
                self.persist(token, network, timestamp, &price).await?;
                self.cache_write(&cache_key, &price).await;
                return Ok(PriceResult {
                    price,
                    source: PriceSource::Live,
                });
            }
            Err(e) => {
                log::info!(
                    "Exact price unavailable for {} ({}), falling back to interpolation",
                    cache_key,
                    e
                );
            }
        }

        let (before, after) = self.bracket(token, network, timestamp).await?;
        let price = interpolate(timestamp, &before, &after);
        log::debug!(
            "Interpolated {} between {} and {}: {}",
            cache_key,
            before.timestamp,
            after.timestamp,
            price
        );
        self.cache_write(&cache_key, &price).await;

        Ok(PriceResult {
            price,
            source: PriceSource::Interpolated,
        })
    }

    /// Bracket points around `timestamp`: nearest stored samples, with a live
    /// sample one day away standing in for any missing side
    async fn bracket(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<(PricePoint, PricePoint), ResolveError> {
        let NearestSamples {
            before: stored_before,
            after: stored_after,
        } = self.store.get_nearest(token, network, timestamp).await?;

        let before = async move {
            match stored_before {
                Some(sample) => Ok(PricePoint::from(sample)),
                None => match timestamp.checked_sub(SECONDS_PER_DAY) {
                    Some(day_before) => self.synthetic_point(token, network, day_before).await,
                    None => Err(BracketError::OutOfRange),
                },
            }
        };
        let after = async move {
            match stored_after {
                Some(sample) => Ok(PricePoint::from(sample)),
                None => match timestamp.checked_add(SECONDS_PER_DAY) {
                    Some(day_after) => self.synthetic_point(token, network, day_after).await,
                    None => Err(BracketError::OutOfRange),
                },
            }
        };

        let (before, after) = futures::join!(before, after);
        match (before, after) {
            (Ok(before), Ok(after)) => Ok((before, after)),
            (Err(BracketError::Store(e)), _) | (_, Err(BracketError::Store(e))) => {
                Err(ResolveError::Store(e))
            }
            (before, after) => {
                if let Err(e) = &before {
                    log::warn!("No lower bracket for {}@{}: {}", token, timestamp, e);
                }
                if let Err(e) = &after {
                    log::warn!("No upper bracket for {}@{}: {}", token, timestamp, e);
                }
                Err(ResolveError::NoPriceData)
            }
        }
    }

    async fn synthetic_point(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<PricePoint, BracketError> {
        let price = self
            .source
            .fetch_price(token, network, timestamp)
            .await
            .map_err(BracketError::Source)?;
        self.persist(token, network, timestamp, &price)
            .await
            .map_err(BracketError::Store)?;
        Ok(PricePoint { timestamp, price })
    }

    async fn persist(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
        price: &BigDecimal,
    ) -> Result<(), StoreError> {
        let sample = PriceSample {
            token: token.clone(),
            network,
            timestamp,
            price: price.clone(),
        };
        self.store.upsert(&sample, SampleOrigin::Live).await
    }

    async fn cache_lookup(&self, key: &str) -> Option<BigDecimal> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match BigDecimal::from_str(&raw) {
                Ok(price) => Some(price),
                Err(e) => {
                    log::warn!("Ignoring unparsable cached price for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Cache read failed for {}, treating as miss: {}", key, e);
                None
            }
        }
    }

    async fn cache_write(&self, key: &str, price: &BigDecimal) {
        if let Err(e) = self
            .cache
            .set(key, price.to_string(), self.settings.cache_ttl)
            .await
        {
            log::warn!("Cache write failed for {}: {}", key, e);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum BracketError {
    #[error(transparent)]
    Source(OracleError),
    #[error(transparent)]
    Store(StoreError),
    #[error("synthetic bracket outside the representable time range")]
    OutOfRange,
}
