//! Provider health tracking
//!
//! Each provider owns exactly one [`ProviderHealth`] and is its only writer.
//! The registry and gateway read [`ProviderHealthStatus`] snapshots.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Latency samples kept for the rolling average
pub const LATENCY_WINDOW: usize = 100;

/// Point-in-time view of a provider's health
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthStatus {
    /// Result of the most recent liveness probe
    pub available: bool,
    /// Last successful invocation
    pub last_success_at: Option<DateTime<Utc>>,
    /// Message of the last failed invocation, cleared on success
    pub last_error: Option<String>,
    /// When the last failure happened
    pub last_error_at: Option<DateTime<Utc>>,
    /// Rolling average over the last [`LATENCY_WINDOW`] successes
    pub average_latency_ms: f64,
}

#[derive(Debug, Default)]
struct HealthInner {
    available: bool,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    latencies: VecDeque<u64>,
    last_probe: Option<Instant>,
}

/// Mutable health state of one provider
#[derive(Debug, Default)]
pub struct ProviderHealth {
    inner: Mutex<HealthInner>,
}

impl ProviderHealth {
    /// Fresh state, not yet probed
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call
    pub fn record_success(&self, latency_ms: u64) {
        let mut inner = self.inner.lock();
        if inner.latencies.len() == LATENCY_WINDOW {
            inner.latencies.pop_front();
        }
        inner.latencies.push_back(latency_ms);
        inner.last_success_at = Some(Utc::now());
        inner.last_error = None;
    }

    /// Record a failed call; availability is left alone
    pub fn record_failure(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.last_error = Some(message.into());
        inner.last_error_at = Some(Utc::now());
    }

    /// Store a probe result taken at `at`
    pub fn record_probe(&self, available: bool, at: Instant) {
        let mut inner = self.inner.lock();
        inner.available = available;
        inner.last_probe = Some(at);
    }

    /// Probe result if it is younger than `ttl`
    pub fn cached_availability(&self, now: Instant, ttl: Duration) -> Option<bool> {
        let inner = self.inner.lock();
        inner
            .last_probe
            .filter(|probed| now.saturating_duration_since(*probed) < ttl)
            .map(|_| inner.available)
    }

    /// Forget the cached probe so the next check hits the vendor
    pub fn invalidate_probe(&self) {
        self.inner.lock().last_probe = None;
    }

    /// Snapshot for diagnostics
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> ProviderHealthStatus {
        let inner = self.inner.lock();
        let average_latency_ms = if inner.latencies.is_empty() {
            0.0
        } else {
            inner.latencies.iter().sum::<u64>() as f64 / inner.latencies.len() as f64
        };
        ProviderHealthStatus {
            available: inner.available,
            last_success_at: inner.last_success_at,
            last_error: inner.last_error.clone(),
            last_error_at: inner.last_error_at,
            average_latency_ms,
        }
    }
}
