//! Retrying front for an upstream price oracle
//!
//! Every call goes through the same [`RetryPolicy`]; the error is surfaced only
//! once the attempt bound is exhausted.

use bigdecimal::BigDecimal;
use std::sync::Arc;

use super::price_provider::{OracleError, PriceOracle};
use super::types::{Network, TokenAddress};
use crate::utils::retry::RetryPolicy;

pub struct PriceSourceAdapter {
    oracle: Arc<dyn PriceOracle>,
    retry: RetryPolicy,
}

impl PriceSourceAdapter {
    pub fn new(oracle: Arc<dyn PriceOracle>, retry: RetryPolicy) -> Self {
        Self { oracle, retry }
    }

    pub fn source_name(&self) -> &'static str {
        self.oracle.source_name()
    }

    pub async fn fetch_price(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<BigDecimal, OracleError> {
        let label = format!(
            "{} price {}:{}@{}",
            self.oracle.source_name(),
            token,
            network,
            timestamp
        );
        self.retry
            .run(&label, OracleError::is_transient, || {
                self.oracle.fetch_price(token, network, timestamp)
            })
            .await
    }

    pub async fn fetch_earliest_activity(
        &self,
        token: &TokenAddress,
        network: Network,
    ) -> Result<i64, OracleError> {
        let label = format!(
            "{} earliest activity {}:{}",
            self.oracle.source_name(),
            token,
            network
        );
        self.retry
            .run(&label, OracleError::is_transient, || {
                self.oracle.fetch_earliest_activity(token, network)
            })
            .await
    }
}
