//! Rate limiting for Microsoft Graph requests
//!
//! Proactive throttling to stay ahead of HTTP 429 responses. A classic
//! token bucket is kept per endpoint category; a throttle event halves
//! the bucket's effective capacity and sustained success restores it
//! gradually.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Consecutive successes required before capacity creeps back up.
const RECOVERY_INTERVAL: u64 = 100;

/// Mutable token-bucket state behind the mutex.
#[derive(Debug)]
struct BucketInner {
    tokens: f64,
    last_refill: Instant,
    effective_capacity: u32,
    success_count: u64,
}

/// Token bucket for a single endpoint category.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    inner: Mutex<BucketInner>,
}

impl TokenBucket {
    /// Creates a full bucket with `capacity` tokens refilled at
    /// `refill_rate` tokens per second.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            inner: Mutex::new(BucketInner {
                tokens: capacity as f64,
                last_refill: Instant::now(),
                effective_capacity: capacity,
                success_count: 0,
            }),
        }
    }

    fn refill(inner: &mut BucketInner, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens =
                (inner.tokens + elapsed * refill_rate).min(inner.effective_capacity as f64);
            inner.last_refill = now;
        }
    }

    /// Takes one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::refill(&mut inner, self.refill_rate);

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Seconds until a token becomes available; 0 when one already is.
    pub fn time_until_available(&self) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        Self::refill(&mut inner, self.refill_rate);

        if inner.tokens >= 1.0 || self.refill_rate <= 0.0 {
            0.0
        } else {
            (1.0 - inner.tokens) / self.refill_rate
        }
    }

    /// Records a success; every [`RECOVERY_INTERVAL`] consecutive
    /// successes restores 5% of lost capacity.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.success_count += 1;

        if inner.success_count % RECOVERY_INTERVAL == 0 && inner.effective_capacity < self.capacity
        {
            let increase = ((inner.effective_capacity as f64) * 0.05).max(1.0) as u32;
            let new_cap = (inner.effective_capacity + increase).min(self.capacity);
            debug!(
                old = inner.effective_capacity,
                new = new_cap,
                "Recovering rate-limit capacity"
            );
            inner.effective_capacity = new_cap;
        }
    }

    /// Records a throttle event: effective capacity halves (floor 1)
    /// and the success streak resets.
    pub fn on_throttle(&self) {
        let mut inner = self.inner.lock().unwrap();
        let old = inner.effective_capacity;
        inner.effective_capacity = (old / 2).max(1);
        inner.tokens = inner.tokens.min(inner.effective_capacity as f64);
        inner.success_count = 0;
        warn!(
            old,
            new = inner.effective_capacity,
            "Throttled: halving rate-limit capacity"
        );
    }

    pub fn effective_capacity(&self) -> u32 {
        self.inner.lock().unwrap().effective_capacity
    }
}

/// Per-endpoint-category rate limiter shared by one Graph client.
#[derive(Debug)]
pub struct RateLimiter {
    default_capacity: u32,
    default_refill_rate: f64,
    buckets: Mutex<HashMap<String, std::sync::Arc<TokenBucket>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        // Graph's per-app mailbox throttling budget is roughly 10k
        // requests per 10 minutes; stay comfortably below it.
        Self::new(64, 12.0)
    }
}

impl RateLimiter {
    pub fn new(default_capacity: u32, default_refill_rate: f64) -> Self {
        Self {
            default_capacity,
            default_refill_rate,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn bucket(&self, category: &str) -> std::sync::Arc<TokenBucket> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(category.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(TokenBucket::new(
                    self.default_capacity,
                    self.default_refill_rate,
                ))
            })
            .clone()
    }

    /// Waits until the category's bucket yields a token.
    pub async fn acquire(&self, category: &str) {
        let bucket = self.bucket(category);
        loop {
            if bucket.try_acquire() {
                return;
            }
            let wait = bucket.time_until_available().max(0.01);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    pub fn on_success(&self, category: &str) {
        self.bucket(category).on_success();
    }

    pub fn on_throttle(&self, category: &str) {
        self.bucket(category).on_throttle();
    }
}

/// Parses a `Retry-After` header value (seconds form) with a fallback.
pub fn parse_retry_after(value: &str, fallback: Duration) -> Duration {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_consumes_and_reports_exhaustion() {
        let bucket = TokenBucket::new(2, 0.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        assert!(bucket.time_until_available() > 0.0 || bucket.time_until_available() == 0.0);
    }

    #[test]
    fn test_throttle_halves_capacity_to_floor() {
        let bucket = TokenBucket::new(8, 1.0);
        bucket.on_throttle();
        assert_eq!(bucket.effective_capacity(), 4);
        bucket.on_throttle();
        bucket.on_throttle();
        bucket.on_throttle();
        assert_eq!(bucket.effective_capacity(), 1);
    }

    #[test]
    fn test_success_streak_recovers_capacity() {
        let bucket = TokenBucket::new(100, 1.0);
        bucket.on_throttle();
        assert_eq!(bucket.effective_capacity(), 50);

        for _ in 0..RECOVERY_INTERVAL {
            bucket.on_success();
        }
        assert!(bucket.effective_capacity() > 50);
    }

    #[test]
    fn test_parse_retry_after() {
        let fallback = Duration::from_secs(30);
        assert_eq!(parse_retry_after("5", fallback), Duration::from_secs(5));
        assert_eq!(parse_retry_after(" 12 ", fallback), Duration::from_secs(12));
        assert_eq!(parse_retry_after("soon", fallback), fallback);
    }

    #[tokio::test]
    async fn test_limiter_acquire_passes_when_tokens_available() {
        let limiter = RateLimiter::new(4, 100.0);
        limiter.acquire("delta").await;
        limiter.on_success("delta");
    }
}
