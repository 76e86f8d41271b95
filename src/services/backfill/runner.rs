//! Walks a token's history day by day and persists every daily price
//!
//! Timestamps are processed in fixed-size batches. Items inside a batch run
//! concurrently; batches run one after another with a pause in between so the
//! upstream rate limit is respected. A missing daily price is logged and
//! skipped, it never fails the job.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::services::price_provider::OracleError;
use crate::services::price_source::PriceSourceAdapter;
use crate::services::price_store::{PriceStore, SampleOrigin, StoreError};
use crate::services::types::{Network, PriceSample, TokenAddress};
use crate::utils::datetime::{daily_timestamps, now_unix};
use crate::utils::env::BackfillSettings;

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("could not determine first activity: {0}")]
    EarliestActivity(#[source] OracleError),
    #[error("price store failed: {0}")]
    Store(#[from] StoreError),
}

impl BackfillError {
    /// Machine-readable reason recorded on a failed job
    pub fn reason_code(&self) -> &'static str {
        match self {
            BackfillError::EarliestActivity(OracleError::NoActivity { .. }) => "no_activity",
            BackfillError::EarliestActivity(_) => "source_unavailable",
            BackfillError::Store(_) => "store_unavailable",
        }
    }

    /// A token with no recorded history will not gain one on retry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackfillError::EarliestActivity(OracleError::NoActivity { .. })
        )
    }

    pub fn is_transient(&self) -> bool {
        match self {
            BackfillError::EarliestActivity(e) => e.is_transient(),
            BackfillError::Store(_) => false,
        }
    }
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub total: usize,
    pub processed: usize,
    /// Timestamps whose price could not be fetched
    pub failed: Vec<i64>,
}

#[derive(Debug)]
enum ItemOutcome {
    Persisted,
    Missing { timestamp: i64, reason: OracleError },
}

pub struct BackfillRunner {
    source: Arc<PriceSourceAdapter>,
    store: Arc<dyn PriceStore>,
    batch_size: usize,
    batch_delay: Duration,
}

impl BackfillRunner {
    pub fn new(
        source: Arc<PriceSourceAdapter>,
        store: Arc<dyn PriceStore>,
        settings: &BackfillSettings,
    ) -> Self {
        Self {
            source,
            store,
            batch_size: settings.batch_size.max(1),
            batch_delay: settings.batch_delay,
        }
    }

    /// Backfill from the token's first activity up to now
    pub async fn run(
        &self,
        token: &TokenAddress,
        network: Network,
        report_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<BackfillSummary, BackfillError> {
        self.run_until(token, network, now_unix(), report_progress)
            .await
    }

    /// Backfill from the token's first activity up to `now` (inclusive)
    pub async fn run_until(
        &self,
        token: &TokenAddress,
        network: Network,
        now: i64,
        report_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<BackfillSummary, BackfillError> {
        let earliest = self
            .source
            .fetch_earliest_activity(token, network)
            .await
            .map_err(BackfillError::EarliestActivity)?;

        let timestamps = daily_timestamps(earliest, now);
        let total = timestamps.len();
        log::info!(
            "Backfilling {} daily prices for {} on {} starting at {}",
            total,
            token,
            network,
            earliest
        );

        let mut summary = BackfillSummary {
            total,
            processed: 0,
            failed: Vec::new(),
        };
        if total == 0 {
            report_progress(100);
            return Ok(summary);
        }

        let completed = AtomicUsize::new(0);
        let batch_count = total.div_ceil(self.batch_size);

        for (index, batch) in timestamps.chunks(self.batch_size).enumerate() {
            let outcomes = join_all(batch.iter().map(|&timestamp| {
                let completed = &completed;
                async move {
                    let outcome = self.process_item(token, network, timestamp).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    report_progress(progress_percent(done, total));
                    outcome
                }
            }))
            .await;

            for outcome in outcomes {
                match outcome? {
                    ItemOutcome::Persisted => summary.processed += 1,
                    ItemOutcome::Missing { timestamp, reason } => {
                        log::warn!(
                            "Skipping {} on {} at {}: {}",
                            token,
                            network,
                            timestamp,
                            reason
                        );
                        summary.failed.push(timestamp);
                    }
                }
            }

            if index + 1 < batch_count {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        log::info!(
            "Backfill of {} on {} finished: {}/{} prices stored",
            token,
            network,
            summary.processed,
            summary.total
        );
        Ok(summary)
    }

    async fn process_item(
        &self,
        token: &TokenAddress,
        network: Network,
        timestamp: i64,
    ) -> Result<ItemOutcome, StoreError> {
        let price = match self.source.fetch_price(token, network, timestamp).await {
            Ok(price) => price,
            Err(reason) => return Ok(ItemOutcome::Missing { timestamp, reason }),
        };

        let sample = PriceSample {
            token: token.clone(),
            network,
            timestamp,
            price,
        };
        self.store.upsert(&sample, SampleOrigin::Backfill).await?;
        Ok(ItemOutcome::Persisted)
    }
}

/// `floor(done / total * 100)`, with failed items counted as done
fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}
