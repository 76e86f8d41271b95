//! Core price types shared by the resolver, the store and the backfill worker

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seconds in one day, the step used for synthetic brackets and backfill
pub const SECONDS_PER_DAY: i64 = 86_400;

/// An ERC-20 contract address, normalised to lowercase `0x`-prefixed hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TokenAddress(String);

impl TokenAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TokenAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| format!("Token address must start with 0x: {}", s))?;

        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "Token address must be 0x followed by 40 hex characters: {}",
                s
            ));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }
}

impl fmt::Display for TokenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Polygon,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" => Ok(Network::Ethereum),
            "polygon" => Ok(Network::Polygon),
            other => Err(format!(
                "Unsupported network '{}', expected ethereum or polygon",
                other
            )),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted price observation. Unique per (token, network, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSample {
    pub token: TokenAddress,
    pub network: Network,
    pub timestamp: i64,
    pub price: BigDecimal,
}

/// A resolution request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceQuery {
    pub token: TokenAddress,
    pub network: Network,
    pub timestamp: i64,
}

/// Which tier produced a resolved price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Cache,
    Store,
    Live,
    Interpolated,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Cache => "cache",
            PriceSource::Store => "store",
            PriceSource::Live => "live",
            PriceSource::Interpolated => "interpolated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceResult {
    pub price: BigDecimal,
    pub source: PriceSource,
}

/// A (timestamp, price) point used as an interpolation bracket
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: BigDecimal,
}

impl From<PriceSample> for PricePoint {
    fn from(sample: PriceSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            price: sample.price,
        }
    }
}

/// Nearest stored samples on either side of a target timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NearestSamples {
    /// Latest sample strictly before the target
    pub before: Option<PriceSample>,
    /// Earliest sample at or after the target
    pub after: Option<PriceSample>,
}
