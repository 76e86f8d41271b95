mod common;

use common::{DAI, MemoryStore, ScriptedOracle, USDC, WETH, fast_backfill_settings, token};
use price_history_be::services::backfill::{
    BackfillError, BackfillQueue, BackfillRunner, DEFAULT_PRIORITY, JobEvent, JobStatus,
    QueueError,
};
use price_history_be::services::price_store::SampleOrigin;
use price_history_be::services::types::{Network, SECONDS_PER_DAY};
use price_history_be::services::PriceSourceAdapter;
use price_history_be::utils::datetime::now_unix;
use price_history_be::utils::env::BackfillSettings;
use price_history_be::utils::retry::RetryPolicy;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

fn runner(
    store: &Arc<MemoryStore>,
    oracle: &Arc<ScriptedOracle>,
    source_attempts: u32,
    settings: &BackfillSettings,
) -> Arc<BackfillRunner> {
    let source = Arc::new(PriceSourceAdapter::new(
        oracle.clone(),
        RetryPolicy::immediate(source_attempts),
    ));
    Arc::new(BackfillRunner::new(source, store.clone(), settings))
}

/// Wait until every job in `ids` has completed or failed
async fn wait_for_finish(
    events: &mut broadcast::Receiver<JobEvent>,
    ids: &[Uuid],
) -> Vec<JobEvent> {
    let mut finished = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while finished.len() < ids.len() {
            match events.recv().await {
                Ok(event @ (JobEvent::Completed { .. } | JobEvent::Failed { .. }))
                    if ids.contains(&event.job_id()) =>
                {
                    finished.push(event)
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await
    .expect("jobs did not finish in time");
    finished
}

#[tokio::test]
async fn test_partial_failure_still_completes() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(0)
        .with_default_price("1.0")
        .missing_at(3 * SECONDS_PER_DAY)
        .build();
    let runner = runner(&store, &oracle, 3, &fast_backfill_settings());
    let progress = Mutex::new(Vec::new());

    let summary = runner
        .run_until(&token(DAI), Network::Ethereum, 9 * SECONDS_PER_DAY, &|percent| {
            progress.lock().unwrap().push(percent)
        })
        .await
        .unwrap();

    assert_eq!(summary.total, 10);
    assert_eq!(summary.processed, 9);
    assert_eq!(summary.failed, vec![3 * SECONDS_PER_DAY]);
    assert_eq!(store.len(), 9);
    assert_eq!(
        store.origin_at(&token(DAI), Network::Ethereum, 0),
        Some(SampleOrigin::Backfill)
    );

    let progress = progress.into_inner().unwrap();
    assert_eq!(progress.len(), 10);
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[tokio::test]
async fn test_daily_timestamps_are_inclusive() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(0)
        .with_default_price("2.0")
        .build();
    let runner = runner(&store, &oracle, 1, &fast_backfill_settings());

    let summary = runner
        .run_until(&token(DAI), Network::Polygon, 172_800, &|_| {})
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    for timestamp in [0, 86_400, 172_800] {
        assert!(store.price_at(&token(DAI), Network::Polygon, timestamp).is_some());
    }
}

#[tokio::test]
async fn test_unknown_first_activity_fails_the_run() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new().with_default_price("1.0").build();
    let runner = runner(&store, &oracle, 3, &fast_backfill_settings());

    let err = runner
        .run_until(&token(DAI), Network::Ethereum, SECONDS_PER_DAY, &|_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, BackfillError::EarliestActivity(_)));
    assert_eq!(err.reason_code(), "no_activity");
    assert_eq!(oracle.earliest_calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_store_outage_fails_the_run() {
    let store = MemoryStore::new();
    store.set_failing(true);
    let oracle = ScriptedOracle::new()
        .with_earliest(0)
        .with_default_price("1.0")
        .build();
    let runner = runner(&store, &oracle, 1, &fast_backfill_settings());

    let err = runner
        .run_until(&token(DAI), Network::Ethereum, SECONDS_PER_DAY, &|_| {})
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "store_unavailable");
}

#[tokio::test]
async fn test_batch_items_run_concurrently_up_to_batch_size() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(0)
        .with_default_price("1.0")
        .with_price_delay(Duration::from_millis(20))
        .build();
    let runner = runner(&store, &oracle, 1, &fast_backfill_settings());

    runner
        .run_until(&token(DAI), Network::Ethereum, 11 * SECONDS_PER_DAY, &|_| {})
        .await
        .unwrap();

    assert_eq!(oracle.max_active_prices.load(Ordering::SeqCst), 5);
    assert_eq!(store.len(), 12);
}

#[tokio::test]
async fn test_pauses_between_batches_only() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(0)
        .with_default_price("1.0")
        .build();
    let settings = BackfillSettings {
        batch_delay: Duration::from_millis(100),
        ..fast_backfill_settings()
    };
    let runner = runner(&store, &oracle, 1, &settings);

    // 6 items, two batches, one pause
    let started = Instant::now();
    runner
        .run_until(&token(DAI), Network::Ethereum, 5 * SECONDS_PER_DAY, &|_| {})
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_queue_runs_job_to_completion() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(now_unix() - 2 * SECONDS_PER_DAY)
        .with_default_price("1.0")
        .build();
    let settings = fast_backfill_settings();
    let queue = BackfillQueue::start(runner(&store, &oracle, 1, &settings), &settings);
    let mut events = queue.subscribe();

    let handle = queue
        .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
        .unwrap();
    let finished = wait_for_finish(&mut events, &[handle.id]).await;

    assert!(matches!(finished[0], JobEvent::Completed { .. }));
    let job = queue.get(handle.id).unwrap();
    assert_eq!(
        job.status,
        JobStatus::Completed {
            processed: 3,
            failed: 0
        }
    );
    assert_eq!(job.progress_percent, 100);
    assert_eq!(job.attempts, 1);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());

    queue.close().await;
}

#[tokio::test]
async fn test_queue_caps_concurrent_jobs() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(now_unix())
        .with_default_price("1.0")
        .with_earliest_delay(Duration::from_millis(100))
        .build();
    let settings = fast_backfill_settings();
    let queue = BackfillQueue::start(runner(&store, &oracle, 1, &settings), &settings);
    let mut events = queue.subscribe();

    let ids: Vec<Uuid> = (0..5)
        .map(|_| {
            queue
                .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
                .unwrap()
                .id
        })
        .collect();
    wait_for_finish(&mut events, &ids).await;

    assert_eq!(oracle.max_active_jobs.load(Ordering::SeqCst), 2);
    assert_eq!(oracle.earliest_calls.load(Ordering::SeqCst), 5);

    queue.close().await;
}

#[tokio::test]
async fn test_higher_priority_jobs_are_dispatched_first() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(now_unix())
        .with_default_price("1.0")
        .with_earliest_delay(Duration::from_millis(100))
        .build();
    let settings = BackfillSettings {
        max_concurrent_jobs: 1,
        ..fast_backfill_settings()
    };
    let queue = BackfillQueue::start(runner(&store, &oracle, 1, &settings), &settings);
    let mut events = queue.subscribe();

    let first = queue.enqueue(token(DAI), Network::Ethereum, 1).unwrap();
    // Let the first job occupy the only slot
    tokio::time::sleep(Duration::from_millis(30)).await;
    let low = queue.enqueue(token(USDC), Network::Ethereum, 1).unwrap();
    let high = queue.enqueue(token(WETH), Network::Ethereum, 9).unwrap();
    wait_for_finish(&mut events, &[first.id, low.id, high.id]).await;

    let order = oracle.earliest_order.lock().unwrap().clone();
    assert_eq!(order, vec![token(DAI), token(WETH), token(USDC)]);

    queue.close().await;
}

#[tokio::test]
async fn test_job_without_activity_fails_without_job_retry() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new().with_default_price("1.0").build();
    let settings = fast_backfill_settings();
    let queue = BackfillQueue::start(runner(&store, &oracle, 3, &settings), &settings);
    let mut events = queue.subscribe();

    let handle = queue
        .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
        .unwrap();
    let finished = wait_for_finish(&mut events, &[handle.id]).await;

    assert_eq!(
        finished[0],
        JobEvent::Failed {
            id: handle.id,
            reason: "no_activity".to_string()
        }
    );
    let job = queue.get(handle.id).unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.status,
        JobStatus::Failed {
            reason: "no_activity".to_string()
        }
    );
    // Only the source adapter's own attempts reach upstream
    assert_eq!(oracle.earliest_calls.load(Ordering::SeqCst), 3);

    queue.close().await;
}

#[tokio::test]
async fn test_job_retry_gives_up_after_bound() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(now_unix())
        .with_earliest_failures(10)
        .with_default_price("1.0")
        .build();
    let settings = fast_backfill_settings();
    let queue = BackfillQueue::start(runner(&store, &oracle, 1, &settings), &settings);
    let mut events = queue.subscribe();

    let handle = queue
        .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
        .unwrap();
    let finished = wait_for_finish(&mut events, &[handle.id]).await;

    assert_eq!(
        finished[0],
        JobEvent::Failed {
            id: handle.id,
            reason: "source_unavailable".to_string()
        }
    );
    assert_eq!(queue.get(handle.id).unwrap().attempts, 3);
    assert_eq!(oracle.earliest_calls.load(Ordering::SeqCst), 3);

    queue.close().await;
}

#[tokio::test]
async fn test_job_retry_recovers_from_transient_failure() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(now_unix())
        .with_earliest_failures(1)
        .with_default_price("1.0")
        .build();
    let settings = fast_backfill_settings();
    let queue = BackfillQueue::start(runner(&store, &oracle, 1, &settings), &settings);
    let mut events = queue.subscribe();

    let handle = queue
        .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
        .unwrap();
    let finished = wait_for_finish(&mut events, &[handle.id]).await;

    assert!(matches!(finished[0], JobEvent::Completed { .. }));
    assert_eq!(queue.get(handle.id).unwrap().attempts, 2);

    queue.close().await;
}

#[tokio::test]
async fn test_purge_removes_finished_jobs() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(now_unix())
        .with_default_price("1.0")
        .build();
    let settings = fast_backfill_settings();
    let queue = BackfillQueue::start(runner(&store, &oracle, 1, &settings), &settings);
    let mut events = queue.subscribe();

    let handle = queue
        .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
        .unwrap();
    wait_for_finish(&mut events, &[handle.id]).await;

    // Within the retention window nothing is dropped
    assert_eq!(queue.purge_expired(), 0);
    assert!(queue.get(handle.id).is_some());

    assert_eq!(queue.purge_finished(Duration::ZERO), 1);
    assert!(queue.get(handle.id).is_none());
    assert!(queue.list().is_empty());

    queue.close().await;
}

#[tokio::test]
async fn test_close_waits_for_running_jobs_and_rejects_new_ones() {
    let store = MemoryStore::new();
    let oracle = ScriptedOracle::new()
        .with_earliest(now_unix())
        .with_default_price("1.0")
        .with_earliest_delay(Duration::from_millis(150))
        .build();
    let settings = fast_backfill_settings();
    let queue = BackfillQueue::start(runner(&store, &oracle, 1, &settings), &settings);

    let handle = queue
        .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    queue.close().await;

    assert!(queue.get(handle.id).unwrap().is_finished());
    assert_eq!(
        queue
            .enqueue(token(DAI), Network::Ethereum, DEFAULT_PRIORITY)
            .unwrap_err(),
        QueueError::Closed
    );
}
