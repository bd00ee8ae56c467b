//! Gateway Metrics
//!
//! Lock-free counters and a latency histogram describing gateway traffic:
//! - Invocation outcomes (success, failure, cache hit, fallback)
//! - Admission-control rejections (budget, rate limit)
//! - Retries and circuit-breaker short-circuits
//! - Per-model request counts, tokens and spend

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds in milliseconds
    buckets: Vec<u64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    /// Total count
    total_count: AtomicU64,
    /// Sum of all values
    sum: AtomicU64,
    /// Maximum value seen
    max: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given bucket bounds
    pub fn new(buckets: Vec<u64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Create with default latency buckets (in milliseconds)
    pub fn latency_default() -> Self {
        Self::new(vec![
            10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10_000, 30_000, 60_000, 120_000,
        ])
    }

    /// Record a value
    pub fn record(&self, value: u64) {
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len().saturating_sub(1));

        if let Some(count) = self.counts.get(bucket_idx) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Get histogram snapshot
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts: self
                .counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            total: self.total_count.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Default, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    pub buckets: Vec<u64>,
    /// Count per bucket
    pub counts: Vec<u64>,
    /// Number of samples
    pub total: u64,
    /// Sum of samples
    pub sum: u64,
    /// Largest sample
    pub max: u64,
}

impl HistogramSnapshot {
    /// Get percentile value (bucket upper bound)
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn percentile(&self, p: f64) -> u64 {
        if self.total == 0 {
            return 0;
        }

        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets[i];
            }
        }

        self.buckets.last().copied().unwrap_or(0)
    }

    /// Mean of all samples
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sum as f64 / self.total as f64
        }
    }
}

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Model Metrics
// ============================================================================

/// Traffic served by one provider/model
#[derive(Debug, Default)]
struct ModelCounters {
    requests: Counter,
    failures: Counter,
    tokens: Counter,
    /// Spend in micro-dollars
    cost_micros: Counter,
}

/// Summary for one provider/model
#[derive(Clone, Debug, Default, Serialize)]
pub struct ModelMetricsSummary {
    /// `provider/model`
    pub model: String,
    /// Attempts made
    pub requests: u64,
    /// Attempts that failed
    pub failures: u64,
    /// Tokens consumed
    pub tokens: u64,
    /// Spend in USD
    pub cost_usd: f64,
}

// ============================================================================
// Gateway Metrics
// ============================================================================

/// Metrics for one gateway instance
#[derive(Debug)]
pub struct GatewayMetrics {
    invocations: Counter,
    successes: Counter,
    failures: Counter,
    cache_hits: Counter,
    fallbacks: Counter,
    retries: Counter,
    breaker_short_circuits: Counter,
    budget_rejections: Counter,
    rate_limit_rejections: Counter,
    cancellations: Counter,
    latency: Histogram,
    models: DashMap<String, ModelCounters>,
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self {
            invocations: Counter::new(),
            successes: Counter::new(),
            failures: Counter::new(),
            cache_hits: Counter::new(),
            fallbacks: Counter::new(),
            retries: Counter::new(),
            breaker_short_circuits: Counter::new(),
            budget_rejections: Counter::new(),
            rate_limit_rejections: Counter::new(),
            cancellations: Counter::new(),
            latency: Histogram::latency_default(),
            models: DashMap::new(),
        }
    }
}

impl GatewayMetrics {
    /// Fresh metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// An invocation started
    pub fn record_invocation(&self) {
        self.invocations.inc();
    }

    /// An invocation returned a response
    pub fn record_success(&self, latency_ms: u64, cache_hit: bool, fallback_used: bool) {
        self.successes.inc();
        self.latency.record(latency_ms);
        if cache_hit {
            self.cache_hits.inc();
        }
        if fallback_used {
            self.fallbacks.inc();
        }
    }

    /// An invocation failed terminally
    pub fn record_failure(&self, latency_ms: u64) {
        self.failures.inc();
        self.latency.record(latency_ms);
    }

    /// One provider attempt finished
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn record_attempt(&self, provider: &str, model: &str, ok: bool, tokens: u32, cost: f64) {
        let entry = self
            .models
            .entry(format!("{provider}/{model}"))
            .or_default();
        entry.requests.inc();
        if !ok {
            entry.failures.inc();
        }
        entry.tokens.add(u64::from(tokens));
        entry.cost_micros.add((cost * 1_000_000.0).round() as u64);
    }

    /// A retry was scheduled
    pub fn record_retry(&self) {
        self.retries.inc();
    }

    /// An open breaker skipped a model
    pub fn record_short_circuit(&self) {
        self.breaker_short_circuits.inc();
    }

    /// Budget guard rejected a request
    pub fn record_budget_rejection(&self) {
        self.budget_rejections.inc();
    }

    /// Rate limiter rejected a request
    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejections.inc();
    }

    /// Caller cancelled a request
    pub fn record_cancellation(&self) {
        self.cancellations.inc();
    }

    /// Point-in-time summary
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        let latency = self.latency.snapshot();
        let mut models: Vec<ModelMetricsSummary> = self
            .models
            .iter()
            .map(|entry| ModelMetricsSummary {
                model: entry.key().clone(),
                requests: entry.requests.get(),
                failures: entry.failures.get(),
                tokens: entry.tokens.get(),
                cost_usd: entry.cost_micros.get() as f64 / 1_000_000.0,
            })
            .collect();
        models.sort_by(|a, b| a.model.cmp(&b.model));

        GatewayMetricsSnapshot {
            invocations: self.invocations.get(),
            successes: self.successes.get(),
            failures: self.failures.get(),
            cache_hits: self.cache_hits.get(),
            fallbacks: self.fallbacks.get(),
            retries: self.retries.get(),
            breaker_short_circuits: self.breaker_short_circuits.get(),
            budget_rejections: self.budget_rejections.get(),
            rate_limit_rejections: self.rate_limit_rejections.get(),
            cancellations: self.cancellations.get(),
            latency_p50_ms: latency.percentile(0.5),
            latency_p90_ms: latency.percentile(0.9),
            latency_p99_ms: latency.percentile(0.99),
            latency_mean_ms: latency.mean(),
            models,
        }
    }
}

/// Serializable metrics summary
#[derive(Clone, Debug, Default, Serialize)]
pub struct GatewayMetricsSnapshot {
    /// Invocations started
    pub invocations: u64,
    /// Invocations that returned a response
    pub successes: u64,
    /// Invocations that failed terminally
    pub failures: u64,
    /// Responses served from cache
    pub cache_hits: u64,
    /// Responses served by a fallback model
    pub fallbacks: u64,
    /// Retries on primary models
    pub retries: u64,
    /// Models skipped because their breaker was open
    pub breaker_short_circuits: u64,
    /// Budget rejections
    pub budget_rejections: u64,
    /// Rate limit rejections
    pub rate_limit_rejections: u64,
    /// Caller cancellations
    pub cancellations: u64,
    /// Median latency bucket
    pub latency_p50_ms: u64,
    /// 90th percentile latency bucket
    pub latency_p90_ms: u64,
    /// 99th percentile latency bucket
    pub latency_p99_ms: u64,
    /// Mean latency
    pub latency_mean_ms: f64,
    /// Per-model breakdown
    pub models: Vec<ModelMetricsSummary>,
}
