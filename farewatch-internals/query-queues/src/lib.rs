//! Farewatch Query Queues
//! Copyright (c) 2026 The Farewatch developers
//! Licensed and distributed under either of
//!   * MIT license (license terms at the root of the package or at http://opensource.org/licenses/MIT).
//!   * Apache v2 license (license terms at the root of the package or at http://www.apache.org/licenses/LICENSE-2.0).
//! at your option. This file may not be copied, modified, or distributed except according to those terms.

//! farewatch-internals/query-queues
//! A bounded work queue with priority lanes and typed retry policies
//! (exponential backoff with jitter) for calls to rate-sensitive external services.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time;

/// How a failed attempt should be treated by the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth another attempt after backing off.
    Transient,
    /// Retrying cannot help; surface the error immediately.
    Terminal,
}

/// Errors that can be run through [`QueryQueue::with_retry`].
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// Custom error for the work queue
#[derive(Debug, Error)]
pub enum QueryQueueError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
    #[error("terminal failure: {0}")]
    Terminal(#[source] E),
    #[error("queue is closed")]
    QueueClosed,
}

impl<E> QueryQueueError<E> {
    /// The last error returned by the operation, if any attempt ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Terminal(e) => Some(e),
            Self::QueueClosed => None,
        }
    }
}

/// Which share of the queue a request draws from.
///
/// Background work (periodic re-checks) is capped to a fraction of the
/// permits so that interactive requests always find capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lane {
    #[default]
    Interactive,
    Background,
}

/// Bounded attempts with exponential backoff and jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Up to `delay * jitter_factor` is added at random to each backoff.
    pub jitter_factor: f64,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(30000),
            jitter_factor: 0.5,
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered backoff before retry number `retry` (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        if !self.exponential || retry <= 1 {
            return self.initial_delay.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Apply jitter to the delay
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 {
            return delay;
        }

        let jitter_ms = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        let rand_jitter = rand::thread_rng().gen_range(0..=jitter_ms);

        Duration::from_millis(delay.as_millis() as u64 + rand_jitter)
    }
}

/// Rate limiting mode
#[derive(Clone, Debug, Default)]
enum RateLimit {
    #[default]
    ConcurrencyOnly,
    Qps {
        limit: u64,
        tokens: Arc<AtomicU64>,
        last_refill: Arc<Mutex<Instant>>,
        refill_interval: Duration,
        notify: Arc<Notify>,
    },
}

/// A slot in the queue. Capacity is returned when it is dropped.
#[derive(Debug)]
pub struct QueuePermit {
    _main: OwnedSemaphorePermit,
    _lane: Option<OwnedSemaphorePermit>,
}

/// A work queue that limits concurrent requests to an external service
/// and retries failed attempts with exponential backoff and jitter.
///
/// # Examples
///
/// Four concurrent sessions, background work limited to one of them:
/// ```ignore
/// let queue = QueryQueue::with_concurrency_limit(4).background_share(1);
/// ```
///
/// QPS limit (4 requests per second):
/// ```ignore
/// let queue = QueryQueue::with_qps_limit(4);
/// ```
#[derive(Clone, Debug)]
pub struct QueryQueue {
    semaphore: Arc<Semaphore>,
    background: Arc<Semaphore>,
    max_concurrent: usize,
    policy: RetryPolicy,
    rate_limit: RateLimit,
}

impl Default for QueryQueue {
    fn default() -> Self {
        Self::with_concurrency_limit(4)
    }
}

impl QueryQueue {
    /// Create a new work queue with max concurrent requests.
    /// Background work gets half of the slots (at least one) unless
    /// [`QueryQueue::background_share`] says otherwise.
    pub fn with_concurrency_limit(max_concurrent: u64) -> Self {
        let max_concurrent = max_concurrent.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            background: Arc::new(Semaphore::new((max_concurrent / 2).max(1))),
            max_concurrent,
            policy: RetryPolicy::default(),
            rate_limit: RateLimit::ConcurrencyOnly,
        }
    }

    /// Create a new work queue with QPS limit
    pub fn with_qps_limit(qps_limit: u64) -> Self {
        let qps_limit = qps_limit.max(1);
        Self {
            rate_limit: RateLimit::Qps {
                limit: qps_limit,
                tokens: Arc::new(AtomicU64::new(qps_limit)),
                last_refill: Arc::new(Mutex::new(Instant::now())),
                refill_interval: Duration::from_secs(1),
                notify: Arc::new(Notify::new()),
            },
            ..Self::with_concurrency_limit(qps_limit)
        }
    }

    /// Add a QPS limit on top of the concurrency limit.
    pub fn qps_limit(mut self, qps_limit: u64) -> Self {
        let qps_limit = qps_limit.max(1);
        self.rate_limit = RateLimit::Qps {
            limit: qps_limit,
            tokens: Arc::new(AtomicU64::new(qps_limit)),
            last_refill: Arc::new(Mutex::new(Instant::now())),
            refill_interval: Duration::from_secs(1),
            notify: Arc::new(Notify::new()),
        };
        self
    }

    /// Maximum number of slots background work may hold at once.
    pub fn background_share(mut self, share: u64) -> Self {
        let share = (share as usize).clamp(1, self.max_concurrent);
        self.background = Arc::new(Semaphore::new(share));
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Slots currently free for interactive work.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot in the given lane. The slot is held until the
    /// returned permit is dropped.
    pub async fn acquire(&self, lane: Lane) -> Result<QueuePermit, QueryQueueError<()>> {
        let lane_permit = match lane {
            Lane::Interactive => None,
            Lane::Background => Some(
                Arc::clone(&self.background)
                    .acquire_owned()
                    .await
                    .map_err(|_| QueryQueueError::QueueClosed)?,
            ),
        };
        let main = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| QueryQueueError::QueueClosed)?;

        self.acquire_token().await;

        Ok(QueuePermit {
            _main: main,
            _lane: lane_permit,
        })
    }

    /// Refill tokens based on elapsed time
    async fn refill_tokens(&self) {
        match &self.rate_limit {
            RateLimit::ConcurrencyOnly => {}
            RateLimit::Qps {
                limit,
                tokens,
                last_refill,
                refill_interval,
                notify,
            } => {
                let mut last = last_refill.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(*last);
                if elapsed >= *refill_interval {
                    let new_tokens = (elapsed.as_secs_f64() * *limit as f64) as u64;
                    if new_tokens > 0 {
                        let _ = tokens.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                            Some(cur.saturating_add(new_tokens).min(*limit))
                        });
                        // Wake up any waiters that token is now available
                        notify.notify_waiters();
                    }
                    *last = now;
                }
            }
        }
    }

    // Acquire a token for rate limiting using async notification
    async fn acquire_token(&self) {
        match &self.rate_limit {
            RateLimit::ConcurrencyOnly => {}
            RateLimit::Qps { tokens, notify, .. } => loop {
                self.refill_tokens().await;
                let available = tokens.load(Ordering::SeqCst);
                if available > 0 {
                    if tokens
                        .compare_exchange(
                            available,
                            available - 1,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        return;
                    }
                } else {
                    let _ = time::timeout(Duration::from_millis(100), notify.notified()).await;
                }
            },
        }
    }

    /// Execute `f` under the queue's limits with the queue's retry policy.
    pub async fn with_retry<T, E, F, Fut>(&self, lane: Lane, f: F) -> Result<T, QueryQueueError<E>>
    where
        E: Retryable,
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, E>> + Send,
    {
        let policy = self.policy.clone();
        self.with_policy(lane, &policy, f).await
    }

    /// Execute `f` under the queue's limits with an explicit retry policy.
    ///
    /// A slot is held for each attempt and released while backing off, so
    /// a sleeping retry never blocks other work. `Terminal` errors are
    /// returned right away; `Transient` ones are retried until
    /// `policy.max_attempts` is reached.
    pub async fn with_policy<T, E, F, Fut>(
        &self,
        lane: Lane,
        policy: &RetryPolicy,
        mut f: F,
    ) -> Result<T, QueryQueueError<E>>
    where
        E: Retryable,
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, E>> + Send,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = {
                let _permit = self
                    .acquire(lane)
                    .await
                    .map_err(|_| QueryQueueError::QueueClosed)?;
                f().await
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.retry_class() == RetryClass::Terminal {
                        return Err(QueryQueueError::Terminal(e));
                    }
                    if attempt >= max_attempts {
                        return Err(QueryQueueError::Exhausted { attempts: attempt, last: e });
                    }

                    let delay = policy.apply_jitter(policy.base_delay(attempt));
                    tracing::debug!(attempt, ?delay, ?lane, "attempt failed, backing off");
                    time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("flaky")]
        Flaky,
        #[error("fatal")]
        Fatal,
    }

    impl Retryable for TestError {
        fn retry_class(&self) -> RetryClass {
            match self {
                Self::Flaky => RetryClass::Transient,
                Self::Fatal => RetryClass::Terminal,
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_millis(350))
            .with_jitter(0.0);
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(350));
        assert_eq!(policy.base_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default().with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.apply_jitter(Duration::from_millis(200));
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_attempts() {
        let queue = QueryQueue::with_concurrency_limit(2)
            .retry_policy(RetryPolicy::default().with_max_attempts(3));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = queue
            .with_retry(Lane::Interactive, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Flaky)
                }
            })
            .await;

        assert!(matches!(result, Err(QueryQueueError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_are_not_retried() {
        let queue = QueryQueue::with_concurrency_limit(2);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = queue
            .with_retry(Lane::Interactive, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            })
            .await;

        assert!(matches!(result, Err(QueryQueueError::Terminal(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let queue = QueryQueue::with_concurrency_limit(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let result = queue
            .with_retry(Lane::Interactive, move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    async fn peak_concurrency(queue: QueryQueue, lane: Lane, tasks: usize) -> usize {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..tasks {
            let queue = queue.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = queue.acquire(lane).await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_capped() {
        let queue = QueryQueue::with_concurrency_limit(3);
        assert_eq!(peak_concurrency(queue, Lane::Interactive, 12).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_lane_gets_a_smaller_share() {
        let queue = QueryQueue::with_concurrency_limit(4).background_share(1);
        assert_eq!(peak_concurrency(queue.clone(), Lane::Background, 6).await, 1);
        assert_eq!(queue.available_permits(), 4);
    }
}
