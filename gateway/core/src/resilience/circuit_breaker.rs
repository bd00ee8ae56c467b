//! Circuit Breaker
//!
//! One breaker per provider+model pair isolates a failing model without
//! penalising its siblings on the same provider.
//!
//! ```text
//! +--------+  failure_threshold   +-------+       timeout        +-----------+
//! | Closed | -------------------> | Open  | -------------------> | Half-Open |
//! +--------+  within window       +-------+                      +-----------+
//!     ^                               ^                                |
//!     |     success_threshold         |          1 failure             |
//!     +-------------------------------+--------------------------------+
//! ```
//!
//! - **Closed**: requests flow; failures are timestamped and pruned to the
//!   monitoring window
//! - **Open**: requests are rejected without touching the provider
//! - **Half-Open**: trial requests are admitted; consecutive successes close
//!   the breaker, any failure reopens it
//!
//! # Thread Safety
//!
//! Each breaker keeps its counters behind one `parking_lot::Mutex`, so every
//! check and transition is indivisible. Breakers live in a `DashMap` keyed by
//! `provider/model`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;

// ============================================================================
// State
// ============================================================================

/// Breaker state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Failing fast
    Open,
    /// Admitting trial calls
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Point-in-time view of a breaker
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    /// `provider/model`
    pub key: String,
    /// Current state
    pub state: CircuitState,
    /// Failures inside the monitoring window
    pub recent_failures: usize,
    /// Consecutive successes while half-open
    pub half_open_successes: u32,
    /// Time left before an open breaker admits a trial
    pub retry_in_ms: Option<u64>,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Failure-isolation state machine for one provider+model
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            key: key.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// `provider/model`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Move an expired open breaker to half-open; caller holds the lock
    fn promote_if_expired(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let expired = inner
            .opened_at
            .map_or(true, |opened| {
                now.saturating_duration_since(opened) >= self.config.timeout()
            });
        if expired {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            tracing::info!(breaker = %self.key, "Circuit breaker transitioning to half-open");
        }
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        let window = self.config.monitoring_window();
        while inner
            .failures
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) > window)
        {
            inner.failures.pop_front();
        }
    }

    /// Current state, applying any due open to half-open transition
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.promote_if_expired(&mut inner, now);
        inner.state
    }

    /// Whether a call may proceed right now
    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Report a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.half_open_successes = 0;
                    inner.opened_at = None;
                    tracing::info!(breaker = %self.key, "Circuit breaker closed - model recovered");
                }
            }
            // Late results from calls admitted before the breaker opened
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Report a failed call
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);
                let failures = inner.failures.len();
                if failures >= self.config.failure_threshold as usize {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        breaker = %self.key,
                        failures,
                        window_ms = self.config.monitoring_window_ms,
                        "Circuit breaker opened - model marked unhealthy"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.half_open_successes = 0;
                tracing::warn!(breaker = %self.key, "Trial call failed, circuit breaker reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Force back to closed
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::default();
    }

    /// Snapshot for diagnostics
    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.promote_if_expired(&mut inner, now);
        self.prune(&mut inner, now);
        let retry_in_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                let left = self
                    .config
                    .timeout()
                    .saturating_sub(now.saturating_duration_since(opened));
                Some(u64::try_from(left.as_millis()).unwrap_or(u64::MAX))
            }
            _ => None,
        };
        CircuitSnapshot {
            key: self.key.clone(),
            state: inner.state,
            recent_failures: inner.failures.len(),
            half_open_successes: inner.half_open_successes,
            retry_in_ms,
        }
    }
}

// ============================================================================
// Breaker Registry
// ============================================================================

/// Lazily created breakers keyed by provider+model
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: RwLock<CircuitBreakerConfig>,
    clock: SharedClock,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config: RwLock::new(config),
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for a provider+model pair, created closed on first use
    pub fn breaker(&self, provider: &str, model: &str) -> Arc<CircuitBreaker> {
        let key = format!("{provider}/{model}");
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    key,
                    self.config.read().clone(),
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    /// Replace the configuration; existing breakers are dropped
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        *self.config.write() = config;
        self.breakers.clear();
    }

    /// Snapshots of every breaker created so far, sorted by key
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snaps: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.key.cmp(&b.key));
        snaps
    }

    /// Drop all breakers
    pub fn clear(&self) {
        self.breakers.clear();
    }

    /// Number of breakers created
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker was created yet
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
