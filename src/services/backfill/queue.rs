//! In-process job queue for backfill requests
//!
//! A single dispatcher task pops the highest-priority pending job (FIFO among
//! equal priorities) and runs it on its own task while holding one of
//! `max_concurrent_jobs` semaphore permits.

use chrono::Utc;
use std::cmp;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::job::{BackfillJob, JobEvent, JobHandle};
use super::runner::{BackfillError, BackfillRunner};
use crate::services::types::{Network, TokenAddress};
use crate::utils::env::BackfillSettings;
use crate::utils::retry::RetryPolicy;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("backfill queue is closed")]
    Closed,
}

#[derive(Debug)]
struct PendingJob {
    priority: u8,
    sequence: u64,
    id: Uuid,
    token: TokenAddress,
    network: Network,
}

impl Ord for PendingJob {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for PendingJob {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for PendingJob {}

pub struct BackfillQueue {
    runner: Arc<BackfillRunner>,
    job_retry: RetryPolicy,
    job_retention: Duration,
    max_concurrent_jobs: usize,
    jobs: Mutex<HashMap<Uuid, BackfillJob>>,
    pending: Mutex<BinaryHeap<PendingJob>>,
    sequence: AtomicU64,
    wake: Notify,
    slots: Arc<Semaphore>,
    events: broadcast::Sender<JobEvent>,
    closed: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BackfillQueue {
    /// Create the queue and spawn its dispatcher on the current runtime
    pub fn start(runner: Arc<BackfillRunner>, settings: &BackfillSettings) -> Arc<Self> {
        let max_concurrent_jobs = settings.max_concurrent_jobs.max(1);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let queue = Arc::new(Self {
            runner,
            job_retry: settings.job_retry,
            job_retention: settings.job_retention,
            max_concurrent_jobs,
            jobs: Mutex::new(HashMap::new()),
            pending: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            wake: Notify::new(),
            slots: Arc::new(Semaphore::new(max_concurrent_jobs)),
            events,
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(queue.clone().dispatch_loop());
        *lock(&queue.dispatcher) = Some(handle);

        log::info!(
            "Backfill queue started (max {} concurrent jobs, {} attempts per job)",
            max_concurrent_jobs,
            settings.job_retry.max_attempts
        );
        queue
    }

    /// Schedule a backfill. Higher `priority` values are dispatched first.
    pub fn enqueue(
        &self,
        token: TokenAddress,
        network: Network,
        priority: u8,
    ) -> Result<JobHandle, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let job = BackfillJob::new(token.clone(), network, priority);
        let id = job.id;
        lock(&self.jobs).insert(id, job);
        lock(&self.pending).push(PendingJob {
            priority,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            id,
            token: token.clone(),
            network,
        });
        self.wake.notify_one();

        log::info!(
            "Scheduled backfill job {} for {} on {} (priority {})",
            id,
            token,
            network,
            priority
        );
        Ok(JobHandle { id })
    }

    pub fn get(&self, id: Uuid) -> Option<BackfillJob> {
        lock(&self.jobs).get(&id).cloned()
    }

    /// All tracked jobs, oldest first
    pub fn list(&self) -> Vec<BackfillJob> {
        let mut jobs: Vec<BackfillJob> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by_key(|job| job.enqueued_at);
        jobs
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Drop completed and failed jobs that finished at least `older_than` ago
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.is_finished() && job.finished_at.is_some_and(|at| at <= cutoff))
        });
        before - jobs.len()
    }

    /// Purge using the configured retention window
    pub fn purge_expired(&self) -> usize {
        self.purge_finished(self.job_retention)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop dispatching and wait for running jobs. Jobs still queued are left
    /// in the `queued` state.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.wake.notify_one();

        let dispatcher = lock(&self.dispatcher).take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                log::error!("Backfill dispatcher task failed: {}", e);
            }
        }

        let running = self.max_concurrent_jobs - self.slots.available_permits();
        if running > 0 {
            log::info!("Waiting for {} running backfill jobs", running);
        }
        if let Err(e) = self.slots.acquire_many(self.max_concurrent_jobs as u32).await {
            log::warn!("Could not wait for running backfill jobs: {}", e);
        }

        log::info!(
            "Backfill queue closed ({} queued jobs not started)",
            self.pending_count()
        );
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let permit = match self.slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(pending) = self.next_pending().await else {
                break;
            };

            let queue = self.clone();
            tokio::spawn(async move {
                queue.execute(pending).await;
                drop(permit);
            });
        }
        log::debug!("Backfill dispatcher stopped");
    }

    async fn next_pending(&self) -> Option<PendingJob> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(job) = lock(&self.pending).pop() {
                return Some(job);
            }
            self.wake.notified().await;
        }
    }

    async fn execute(&self, pending: PendingJob) {
        let PendingJob {
            id, token, network, ..
        } = pending;

        self.update_job(id, BackfillJob::mark_running);
        log::info!("Starting backfill job {} for {} on {}", id, token, network);

        let report_progress = |percent: u8| self.record_progress(id, percent);
        let report_progress: &(dyn Fn(u8) + Send + Sync) = &report_progress;
        let token = &token;
        let label = format!("backfill job {}", id);
        let mut attempt = 0;

        let result = self
            .job_retry
            .run_unless(
                &label,
                BackfillError::is_transient,
                BackfillError::is_terminal,
                || {
                    attempt += 1;
                    self.update_job(id, |job| job.attempts = attempt);
                    self.runner.run(token, network, report_progress)
                },
            )
            .await;

        match result {
            Ok(summary) => {
                self.update_job(id, |job| job.mark_completed(&summary));
                log::info!(
                    "Backfill job {} completed: {}/{} prices stored, {} missing",
                    id,
                    summary.processed,
                    summary.total,
                    summary.failed.len()
                );
                self.publish(JobEvent::Completed { id, summary });
            }
            Err(e) => {
                let reason = e.reason_code().to_string();
                self.update_job(id, |job| job.mark_failed(reason.clone()));
                log::error!(
                    "Backfill job {} failed after {} attempts: {}",
                    id,
                    attempt,
                    e
                );
                self.publish(JobEvent::Failed { id, reason });
            }
        }
    }

    fn record_progress(&self, id: Uuid, percent: u8) {
        let changed = lock(&self.jobs)
            .get_mut(&id)
            .is_some_and(|job| job.record_progress(percent));
        if changed {
            log::debug!("Backfill job {} progress: {}%", id, percent);
            self.publish(JobEvent::Progress { id, percent });
        }
    }

    fn update_job(&self, id: Uuid, apply: impl FnOnce(&mut BackfillJob)) {
        if let Some(job) = lock(&self.jobs).get_mut(&id) {
            apply(job);
        }
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodically purge finished jobs past the retention window
pub async fn run_backfill_housekeeping(queue: Arc<BackfillQueue>, interval: Duration) {
    log::info!(
        "Starting backfill housekeeping (interval: {} seconds)",
        interval.as_secs()
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if queue.is_closed() {
            break;
        }

        let purged = queue.purge_expired();
        if purged > 0 {
            log::info!("Purged {} finished backfill jobs", purged);
        }
    }
}
