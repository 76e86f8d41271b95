//! Alchemy client for historical token prices and first on-chain activity
//!
//! Prices come from the Alchemy Prices API (`/tokens/historical`), hourly
//! granularity around the requested timestamp. The first activity of a token
//! is taken from its earliest ERC-20 transfer via `alchemy_getAssetTransfers`.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;

use super::price_provider::{OracleError, PriceOracle};
use super::types::{Network, TokenAddress};
use crate::utils::datetime::unix_to_rfc3339;
use crate::utils::jsonrpc::{JsonRpcRequest, JsonRpcResponse};

/// Default Alchemy Prices API base URL
const DEFAULT_ALCHEMY_PRICES_BASE: &str = "https://api.g.alchemy.com/prices/v1";

/// Half-width of the window queried around the target timestamp (1 hour)
const PRICE_WINDOW_SECS: i64 = 3_600;

fn network_slug(network: Network) -> &'static str {
    match network {
        Network::Ethereum => "eth-mainnet",
        Network::Polygon => "polygon-mainnet",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoricalPriceRequest<'a> {
    network: &'a str,
    address: &'a str,
    start_time: String,
    end_time: String,
    interval: &'a str,
}

/// Response from /tokens/historical endpoint
#[derive(Debug, Deserialize)]
struct HistoricalPriceResponse {
    #[serde(default)]
    data: Vec<HistoricalPricePoint>,
}

#[derive(Debug, Deserialize)]
struct HistoricalPricePoint {
    value: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct AssetTransfersResult {
    #[serde(default)]
    transfers: Vec<AssetTransfer>,
}

#[derive(Debug, Deserialize)]
struct AssetTransfer {
    metadata: Option<TransferMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferMetadata {
    block_timestamp: Option<String>,
}

/// Alchemy API client
pub struct AlchemyClient {
    http_client: Client,
    api_key: String,
    prices_base_url: String,
    rpc_base_url: Option<String>,
}

impl AlchemyClient {
    /// Creates a new Alchemy client against the public endpoints
    pub fn new(http_client: Client, api_key: String) -> Self {
        Self {
            http_client,
            api_key,
            prices_base_url: DEFAULT_ALCHEMY_PRICES_BASE.to_string(),
            rpc_base_url: None,
        }
    }

    /// Creates a new Alchemy client with custom base URLs
    ///
    /// This is useful for testing with a mock server. With an RPC override the
    /// network endpoint becomes `{rpc_base_url}/{network-slug}/v2/{api_key}`.
    pub fn with_base_urls(
        http_client: Client,
        api_key: String,
        prices_base_url: String,
        rpc_base_url: Option<String>,
    ) -> Self {
        Self {
            http_client,
            api_key,
            prices_base_url,
            rpc_base_url,
        }
    }

    fn rpc_url(&self, network: Network) -> String {
        let slug = network_slug(network);
        match &self.rpc_base_url {
            Some(base) => format!("{}/{}/v2/{}", base, slug, self.api_key),
            None => format!("https://{}.g.alchemy.com/v2/{}", slug, self.api_key),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, OracleError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Pick the price whose timestamp is closest to `target`
fn closest_price(points: &[HistoricalPricePoint], target: i64) -> Option<BigDecimal> {
    points
        .iter()
        .filter_map(|p| {
            let ts = DateTime::parse_from_rfc3339(&p.timestamp).ok()?.timestamp();
            let price = BigDecimal::from_str(&p.value).ok()?;
            Some(((ts - target).abs(), price))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, price)| price)
}

#[async_trait]
impl PriceOracle for AlchemyClient {
    fn source_name(&self) -> &'static str {
        "alchemy"
    }

    async fn fetch_price(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<BigDecimal, OracleError> {
        let invalid_time =
            || OracleError::InvalidResponse(format!("timestamp {} out of range", timestamp));
        let body = HistoricalPriceRequest {
            network: network_slug(network),
            address: token.as_str(),
            start_time: timestamp
                .checked_sub(PRICE_WINDOW_SECS)
                .and_then(unix_to_rfc3339)
                .ok_or_else(invalid_time)?,
            end_time: timestamp
                .checked_add(PRICE_WINDOW_SECS)
                .and_then(unix_to_rfc3339)
                .ok_or_else(invalid_time)?,
            interval: "1h",
        };

        let url = format!("{}/{}/tokens/historical", self.prices_base_url, self.api_key);

        log::debug!(
            "Fetching price from Alchemy: {} on {} at {}",
            token,
            network,
            timestamp
        );

        let response = self
            .http_client
            .post(&url)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let data: HistoricalPriceResponse = Self::check_status(response).await?.json().await?;

        match closest_price(&data.data, timestamp) {
            Some(price) => {
                log::debug!("Alchemy: {} price at {} = ${}", token, timestamp, price);
                Ok(price)
            }
            None => Err(OracleError::NoPriceData {
                token: token.clone(),
                network,
                timestamp,
            }),
        }
    }

    async fn fetch_earliest_activity(
        &self,
        token: &TokenAddress,
        network: Network,
    ) -> Result<i64, OracleError> {
        let request = JsonRpcRequest::new(
            "1",
            "alchemy_getAssetTransfers",
            vec![json!({
                "fromBlock": "0x0",
                "contractAddresses": [token.as_str()],
                "category": ["erc20"],
                "order": "asc",
                "maxCount": "0x1",
                "withMetadata": true,
                "excludeZeroValue": false
            })],
        );

        log::debug!("Fetching first transfer for {} on {}", token, network);

        let response = self
            .http_client
            .post(self.rpc_url(network))
            .json(&request)
            .send()
            .await?;

        let rpc: JsonRpcResponse<AssetTransfersResult> =
            Self::check_status(response).await?.json().await?;
        let result = rpc.into_result().map_err(OracleError::InvalidResponse)?;

        let first = result.transfers.first().ok_or_else(|| OracleError::NoActivity {
            token: token.clone(),
            network,
        })?;

        let block_timestamp = first
            .metadata
            .as_ref()
            .and_then(|m| m.block_timestamp.as_deref())
            .ok_or_else(|| {
                OracleError::InvalidResponse(
                    "metadata or blockTimestamp missing from first transfer".to_string(),
                )
            })?;

        let created_at = DateTime::parse_from_rfc3339(block_timestamp)
            .map_err(|e| OracleError::InvalidResponse(format!("bad blockTimestamp: {}", e)))?;

        log::info!(
            "Alchemy: first activity of {} on {} at {}",
            token,
            network,
            created_at
        );

        Ok(created_at.timestamp())
    }
}
