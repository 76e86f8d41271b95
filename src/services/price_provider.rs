//! Price oracle trait for fetching token prices from an upstream source
//!
//! This module defines the interface for raw upstream price data. An oracle
//! makes exactly one attempt per call; retries live in
//! [`PriceSourceAdapter`](super::price_source::PriceSourceAdapter).

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use super::types::{Network, TokenAddress};

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("no price data for {token} on {network} at {timestamp}")]
    NoPriceData {
        token: TokenAddress,
        network: Network,
        timestamp: i64,
    },
    #[error("no activity found for {token} on {network}")]
    NoActivity { token: TokenAddress, network: Network },
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl OracleError {
    /// Rate limits and timeouts are expected to clear on their own
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::RateLimited => true,
            OracleError::Http(e) => e.is_timeout() || e.is_connect(),
            OracleError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Trait for upstream price oracles
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Returns the name of the price source (e.g., "alchemy")
    fn source_name(&self) -> &'static str;

    /// Fetches the USD price of `token` at `timestamp` (unix seconds)
    ///
    /// # Returns
    /// * `Ok(price)` - The USD price closest to the timestamp
    /// * `Err(OracleError::NoPriceData)` - The upstream has no data for that time
    /// * `Err(_)` - Any other upstream or transport failure
    async fn fetch_price(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<BigDecimal, OracleError>;

    /// Fetches the unix timestamp of the token's first observed on-chain activity
    ///
    /// # Returns
    /// * `Err(OracleError::NoActivity)` - The token has no recorded history
    async fn fetch_earliest_activity(
        &self,
        token: &TokenAddress,
        network: Network,
    ) -> Result<i64, OracleError>;
}
