//! Execution substrate: in-place step retries and run throttling.
//!
//! - [`RetryPolicy`] and [`retry_step`] retry one fallible step where it
//!   failed, with exponential backoff, instead of restarting the run.
//! - [`RollingWindowLimiter`] bounds how many times a key may proceed per
//!   rolling window. Excess callers wait; nothing is dropped.
//! - [`RunGate`] combines a concurrency bound with a rolling-window rate for
//!   whole pipeline runs.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Errors that know whether retrying them can help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for crate::research::provider::ProviderError {
    fn is_transient(&self) -> bool {
        crate::research::provider::ProviderError::is_transient(self)
    }
}

impl Transient for crate::research::channel::PublishError {
    fn is_transient(&self) -> bool {
        true
    }
}

/// Bounded retry with exponential backoff.
///
/// `max_retries` counts retries, not attempts: the default of 2 allows three
/// attempts in total.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_retries` times with no delay.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::immediate(0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether another attempt may follow failed attempt number `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Terminal outcome of [`retry_step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure<E> {
    /// Attempts made, including the last one.
    pub attempts: u32,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for StepFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.error)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for StepFailure<E> {}

/// Run `step` until it succeeds, fails terminally, or runs out of retries.
///
/// The closure receives the 1-based attempt number. Transient errors are
/// retried after [`RetryPolicy::backoff_for`]; terminal ones return at once.
pub async fn retry_step<F, Fut, T, E>(
    policy: &RetryPolicy,
    step_name: &str,
    mut step: F,
) -> Result<T, StepFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + fmt::Display,
{
    let mut attempt = 1;
    loop {
        match step(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && policy.allows_retry(attempt) => {
                let backoff = policy.backoff_for(attempt);
                log::warn!(
                    "fanout_research::substrate::retry_step({}): attempt {}/{} failed: {}; retrying in {:?}",
                    step_name,
                    attempt,
                    policy.max_attempts(),
                    error,
                    backoff
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                attempt += 1;
            }
            Err(error) => return Err(StepFailure { attempts: attempt, error }),
        }
    }
}

/// At most `limit` acquisitions per rolling `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub period: Duration,
}

impl RateLimit {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            limit: limit.max(1),
            period,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Rolling-window rate limiter keyed by `K`.
///
/// Each key keeps the instants of its acquisitions inside the window. A caller
/// over the limit sleeps until the oldest entry leaves the window. Keys with no
/// acquisition left inside the window are forgotten.
pub struct RollingWindowLimiter<K> {
    rate: RateLimit,
    windows: Mutex<HashMap<K, VecDeque<Instant>>>,
}

impl<K> RollingWindowLimiter<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(rate: RateLimit) -> Self {
        Self {
            rate,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn rate(&self) -> RateLimit {
        self.rate
    }

    /// Wait until `key` may proceed, then record the acquisition.
    pub async fn acquire(&self, key: &K) {
        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let now = Instant::now();
                self.sweep(&mut windows, now);
                let window = windows.entry(key.clone()).or_default();
                if window.len() < self.rate.limit as usize {
                    window.push_back(now);
                    return;
                }
                match window.front() {
                    Some(oldest) => self.rate.period.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            log::debug!(
                "fanout_research::substrate::RollingWindowLimiter::acquire({:?}): window full, waiting {:?}",
                key,
                wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Acquisitions of `key` still inside the window.
    pub async fn in_window(&self, key: &K) -> usize {
        let mut windows = self.windows.lock().await;
        self.sweep(&mut windows, Instant::now());
        windows.get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// Keys with at least one acquisition inside the window.
    pub async fn tracked_keys(&self) -> usize {
        let mut windows = self.windows.lock().await;
        self.sweep(&mut windows, Instant::now());
        windows.len()
    }

    fn sweep(&self, windows: &mut HashMap<K, VecDeque<Instant>>, now: Instant) {
        windows.retain(|_, window| {
            while let Some(front) = window.front() {
                if now.duration_since(*front) >= self.rate.period {
                    window.pop_front();
                } else {
                    break;
                }
            }
            !window.is_empty()
        });
    }
}

/// Admission control for whole pipeline runs.
///
/// A run first waits for the rolling rate, then for one of `max_concurrent`
/// permits, and holds the permit for its whole duration.
pub struct RunGate {
    permits: Arc<Semaphore>,
    rate: RollingWindowLimiter<()>,
}

/// Held while a run is admitted; dropping it frees the slot.
pub struct RunPermit {
    _permit: OwnedSemaphorePermit,
}

impl RunGate {
    pub fn new(max_concurrent: usize, rate: RateLimit) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            rate: RollingWindowLimiter::new(rate),
        }
    }

    /// Wait for admission. Fails only once the gate has been [`close`](Self::close)d.
    pub async fn admit(&self) -> Result<RunPermit, AcquireError> {
        self.rate.acquire(&()).await;
        let permit = Arc::clone(&self.permits).acquire_owned().await?;
        Ok(RunPermit { _permit: permit })
    }

    /// Stop admitting runs. Runs already admitted keep their permits.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}
