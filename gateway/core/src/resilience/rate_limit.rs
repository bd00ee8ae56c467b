//! Token-bucket rate limiter
//!
//! Capacity is `burst_size` tokens, refilled continuously at
//! `requests_per_minute`. When the bucket is empty a request may reserve a
//! future token (queueing) as long as no more than `max_queue_size` requests
//! are already waiting; the reservation is taken under the same lock as the
//! refill, so concurrent callers never double-spend a token.
//!
//! Tokens are tracked in milli-tokens so partial refills are not lost.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;
use crate::error::GatewayError;

const TOKEN: i64 = 1000;

/// Result of a non-blocking bucket check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Token consumed, proceed now
    Allowed,
    /// Token reserved, proceed after the delay
    Queued {
        /// How long to wait for the reserved token
        delay: Duration,
    },
    /// No token and no queue slot
    Rejected {
        /// Estimated wait until a token frees up
        retry_after: Duration,
    },
}

#[derive(Debug)]
struct Bucket {
    /// Negative while requests hold reservations
    tokens_millis: i64,
    last_refill: Instant,
}

/// Snapshot of limiter counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitMetrics {
    /// Whole tokens currently available
    pub available_tokens: u32,
    /// Requests currently waiting for a reserved token
    pub queued: u32,
    /// Requests admitted immediately
    pub allowed: u64,
    /// Requests admitted after waiting
    pub delayed: u64,
    /// Requests rejected
    pub rejected: u64,
}

/// Shared token bucket guarding provider calls
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: SharedClock,
    bucket: Mutex<Bucket>,
    waiting: AtomicU32,
    allowed: AtomicU64,
    delayed: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// Create a full bucket
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        let bucket = Bucket {
            tokens_millis: Self::capacity(&config),
            last_refill: clock.now(),
        };
        Self {
            config,
            clock,
            bucket: Mutex::new(bucket),
            waiting: AtomicU32::new(0),
            allowed: AtomicU64::new(0),
            delayed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn capacity(config: &RateLimitConfig) -> i64 {
        i64::from(config.burst_size) * TOKEN
    }

    fn rate(&self) -> i64 {
        i64::from(self.config.requests_per_minute.max(1))
    }

    /// Time for the bucket to gain `millis` milli-tokens
    fn time_for(&self, millis: i64) -> Duration {
        let micros = millis.max(0) * 60_000 / self.rate();
        Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let capacity = Self::capacity(&self.config);
        let elapsed_us =
            i64::try_from(now.saturating_duration_since(bucket.last_refill).as_micros())
                .unwrap_or(i64::MAX);
        let add = elapsed_us.saturating_mul(self.rate()) / 60_000;
        if add == 0 {
            return;
        }
        let new_tokens = bucket.tokens_millis.saturating_add(add);
        if new_tokens >= capacity {
            bucket.tokens_millis = capacity;
            bucket.last_refill = now;
        } else {
            bucket.tokens_millis = new_tokens;
            // keep the fractional remainder for the next refill
            let used_us = add * 60_000 / self.rate();
            bucket.last_refill += Duration::from_micros(u64::try_from(used_us).unwrap_or(0));
        }
    }

    /// Atomically refill and take (or reserve) one token
    pub fn check(&self) -> RateLimitResult {
        let now = self.clock.now();
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);

        if bucket.tokens_millis >= TOKEN {
            bucket.tokens_millis -= TOKEN;
            self.allowed.fetch_add(1, Ordering::Relaxed);
            return RateLimitResult::Allowed;
        }

        // Requests already holding reservations, counting this one
        let debt = TOKEN - bucket.tokens_millis;
        let queue_full = (debt + TOKEN - 1) / TOKEN > i64::from(self.config.max_queue_size);
        if !self.config.queue_enabled || queue_full {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return RateLimitResult::Rejected {
                retry_after: self.time_for(TOKEN - bucket.tokens_millis),
            };
        }

        bucket.tokens_millis -= TOKEN;
        self.delayed.fetch_add(1, Ordering::Relaxed);
        RateLimitResult::Queued {
            delay: self.time_for(-bucket.tokens_millis),
        }
    }

    /// Wait for a token, or fail with `RateLimitExceeded`
    ///
    /// Returns how long the caller waited.
    ///
    /// # Errors
    ///
    /// `GatewayError::RateLimitExceeded` when the bucket is empty and the
    /// wait queue is disabled or full.
    pub async fn acquire(&self) -> Result<Duration, GatewayError> {
        match self.check() {
            RateLimitResult::Allowed => Ok(Duration::ZERO),
            RateLimitResult::Rejected { retry_after } => {
                Err(GatewayError::RateLimitExceeded { retry_after })
            }
            RateLimitResult::Queued { delay } => {
                let guard = Reservation::new(self);
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Rate limited, waiting for token");
                tokio::time::sleep(delay).await;
                guard.complete();
                Ok(delay)
            }
        }
    }

    /// Refill to full capacity and forget reservations
    pub fn reset(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens_millis = Self::capacity(&self.config);
        bucket.last_refill = self.clock.now();
    }

    /// Counter snapshot
    pub fn metrics(&self) -> RateLimitMetrics {
        let tokens = {
            let now = self.clock.now();
            let mut bucket = self.bucket.lock();
            self.refill(&mut bucket, now);
            bucket.tokens_millis
        };
        RateLimitMetrics {
            available_tokens: u32::try_from(tokens.max(0) / TOKEN).unwrap_or(u32::MAX),
            queued: self.waiting.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Tracks a waiting request; returns the reserved token if the wait is
/// abandoned (e.g. the caller was cancelled)
struct Reservation<'a> {
    limiter: &'a RateLimiter,
    completed: bool,
}

impl<'a> Reservation<'a> {
    fn new(limiter: &'a RateLimiter) -> Self {
        limiter.waiting.fetch_add(1, Ordering::Relaxed);
        Self {
            limiter,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.limiter.waiting.fetch_sub(1, Ordering::Relaxed);
        if !self.completed {
            let mut bucket = self.limiter.bucket.lock();
            bucket.tokens_millis += TOKEN;
        }
    }
}
