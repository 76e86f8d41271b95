//! Durable price storage
//!
//! Samples are keyed by (token, network, timestamp); writes are upserts so
//! repeated fetches of the same point never create duplicates.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use super::types::{NearestSamples, Network, PriceSample, TokenAddress};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt price row: {0}")]
    InvalidRow(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Where a persisted value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrigin {
    /// Fetched on demand by the resolver
    Live,
    /// Written by a backfill job
    Backfill,
}

impl SampleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOrigin::Live => "live",
            SampleOrigin::Backfill => "backfill",
        }
    }
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Insert or replace the price at (token, network, timestamp)
    async fn upsert(&self, sample: &PriceSample, origin: SampleOrigin) -> Result<(), StoreError>;

    async fn get_exact(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<Option<PriceSample>, StoreError>;

    /// Latest sample strictly before `timestamp` and earliest sample at or after it
    async fn get_nearest(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<NearestSamples, StoreError>;

    /// Samples with `start <= timestamp <= end`, ascending by timestamp
    async fn range(
        &self,
        token: &TokenAddress,
        network: Network,
        start: i64,
        end: i64,
    ) -> Result<Vec<PriceSample>, StoreError>;

    /// Cheap connectivity check for health reporting
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, sqlx::FromRow)]
struct PriceRow {
    token: String,
    network: String,
    timestamp: i64,
    price: BigDecimal,
}

impl TryFrom<PriceRow> for PriceSample {
    type Error = StoreError;

    fn try_from(row: PriceRow) -> Result<Self, Self::Error> {
        Ok(PriceSample {
            token: row.token.parse().map_err(StoreError::InvalidRow)?,
            network: row.network.parse().map_err(StoreError::InvalidRow)?,
            timestamp: row.timestamp,
            price: row.price,
        })
    }
}

/// PostgreSQL-backed price store (`token_prices` table)
#[derive(Clone)]
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_side(
        &self,
        sql: &str,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<Option<PriceSample>, StoreError> {
        sqlx::query_as::<_, PriceRow>(sql)
            .bind(token.as_str())
            .bind(network.as_str())
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?
            .map(PriceSample::try_from)
            .transpose()
    }
}

#[async_trait]
impl PriceStore for PgPriceStore {
    async fn upsert(&self, sample: &PriceSample, origin: SampleOrigin) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO token_prices (token, network, timestamp, price, source)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token, network, timestamp) DO UPDATE SET
                price = EXCLUDED.price,
                source = EXCLUDED.source,
                updated_at = NOW()
            "#,
        )
        .bind(sample.token.as_str())
        .bind(sample.network.as_str())
        .bind(sample.timestamp)
        .bind(&sample.price)
        .bind(origin.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_exact(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<Option<PriceSample>, StoreError> {
        self.fetch_one_side(
            r#"
            SELECT token, network, timestamp, price
            FROM token_prices
            WHERE token = $1 AND network = $2 AND timestamp = $3
            "#,
            token,
            network,
            timestamp,
        )
        .await
    }

    async fn get_nearest(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<NearestSamples, StoreError> {
        let before = self.fetch_one_side(
            r#"
            SELECT token, network, timestamp, price
            FROM token_prices
            WHERE token = $1 AND network = $2 AND timestamp < $3
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
            token,
            network,
            timestamp,
        );
        let after = self.fetch_one_side(
            r#"
            SELECT token, network, timestamp, price
            FROM token_prices
            WHERE token = $1 AND network = $2 AND timestamp >= $3
            ORDER BY timestamp ASC
            LIMIT 1
            "#,
            token,
            network,
            timestamp,
        );

        let (before, after) = tokio::try_join!(before, after)?;
        Ok(NearestSamples { before, after })
    }

    async fn range(
        &self,
        token: &TokenAddress,
        network: Network,
        start: i64,
        end: i64,
    ) -> Result<Vec<PriceSample>, StoreError> {
        let rows = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT token, network, timestamp, price
            FROM token_prices
            WHERE token = $1 AND network = $2 AND timestamp BETWEEN $3 AND $4
            ORDER BY timestamp ASC
            "#,
        )
        .bind(token.as_str())
        .bind(network.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PriceSample::try_from).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
