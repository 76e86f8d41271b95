//! Bounded retry with exponential backoff
//!
//! Shared by the price source adapter (per upstream call) and the backfill
//! queue (per job attempt). Failures are retried the same way unless the
//! caller marks them as terminal; the transient classifier only shapes the log
//! line.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2,
        }
    }

    /// Policy that never sleeps between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay to wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `make_call` until it succeeds or `max_attempts` is exhausted.
    ///
    /// `is_transient` only affects logging.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        label: &str,
        is_transient: C,
        make_call: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        C: Fn(&E) -> bool,
    {
        self.run_unless(label, is_transient, |_| false, make_call).await
    }

    /// Like [`run`](Self::run), but returns the first error `is_terminal`
    /// accepts without retrying it.
    pub async fn run_unless<T, E, F, Fut, C, P>(
        &self,
        label: &str,
        is_transient: C,
        is_terminal: P,
        mut make_call: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        C: Fn(&E) -> bool,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match make_call().await {
                Ok(result) => return Ok(result),
                Err(e) if is_terminal(&e) => {
                    log::warn!("{}: not retrying after attempt {}: {}", label, attempt, e);
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    log::warn!(
                        "{}: giving up after {} attempts: {}",
                        label,
                        self.max_attempts,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_before(attempt + 1);
                    if is_transient(&e) {
                        log::info!(
                            "{}: rate limited, retrying in {}ms (attempt {}/{})",
                            label,
                            delay.as_millis(),
                            attempt + 1,
                            self.max_attempts
                        );
                    } else {
                        log::warn!(
                            "{}: {}, retrying in {}ms (attempt {}/{})",
                            label,
                            e,
                            delay.as_millis(),
                            attempt + 1,
                            self.max_attempts
                        );
                    }
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}
