//! Token-bucket rate limiting and backoff computation.
//!
//! The bucket is the single shared component bounding aggregate outbound
//! rate across all in-flight jobs. Callers suspend on `acquire` (tokio
//! sleep, never busy-polling), and waiters drain in lock-acquisition
//! order because the tokio mutex is held across the refill wait.

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Async token bucket: fixed refill rate, bounded burst.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `refill_rate` is tokens per second; `capacity` is the burst bound.
    pub fn new(refill_rate: f64, capacity: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, suspending until it is available.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
        } else {
            let wait = (1.0 - state.tokens) / self.refill_rate;
            sleep(Duration::from_secs_f64(wait)).await;
            state.tokens = 0.0;
            state.last_refill = Instant::now();
        }
    }
}

/// Exponential backoff schedule with jitter, derived from [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    multiplier: f64,
    cap: Duration,
    jitter: f64,
    max_attempts: usize,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            cap: Duration::from_millis(config.cap_ms),
            jitter: config.jitter,
            max_attempts: config.max_attempts,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Delay before retrying after a failed attempt (0-indexed: the delay
    /// after the first failure is `delay(0)`), capped then jittered.
    pub fn delay(&self, attempt: usize) -> Duration {
        let exp = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.cap.as_secs_f64());
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }

    /// Lower bound for `delay(attempt)` regardless of jitter draw. Used by
    /// timing assertions in tests.
    pub fn min_delay(&self, attempt: usize) -> Duration {
        let exp = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped * (1.0 - self.jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            base_delay_ms: 1000,
            multiplier: 2.0,
            cap_ms: 5000,
            jitter,
            max_attempts: 5,
            call_timeout_ms: 30_000,
        })
    }

    #[test]
    fn delays_grow_exponentially_then_cap() {
        let policy = policy(0.0);
        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(2), Duration::from_millis(4000));
        assert_eq!(policy.delay(3), Duration::from_millis(5000));
        assert_eq!(policy.delay(10), Duration::from_millis(5000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = policy(0.25);
        for attempt in 0..4 {
            let d = policy.delay(attempt).as_secs_f64();
            let min = policy.min_delay(attempt).as_secs_f64();
            assert!(d >= min - f64::EPSILON);
            assert!(d <= min / (1.0 - 0.25) * (1.0 + 0.25) + f64::EPSILON);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate() {
        let bucket = TokenBucket::new(10.0, 3.0);
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn drained_bucket_waits_at_rate() {
        let bucket = TokenBucket::new(2.0, 1.0);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        // One token at 2/sec: roughly half a second.
        assert!(start.elapsed() >= Duration::from_millis(450));
    }
}
