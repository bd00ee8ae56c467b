//! External collaborator ports
//!
//! The gateway persists usage and reads spend through [`PersistencePort`] and
//! caches responses through [`CachePort`]. Both are optional and may fail; a
//! failure degrades the gateway (no budget enforcement, no cache) instead of
//! failing the invocation.
//!
//! In-memory implementations are provided for embedding and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::EffectiveConfig;
use crate::usage::UsageRecord;

/// Failure of a port operation
#[derive(Clone, Debug, Error)]
pub enum PortError {
    /// Backing store could not be reached
    #[error("port unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Any other I/O failure
    #[error("port I/O error: {0}")]
    Io(String),
}

/// Durable storage of configuration and usage
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// The active configuration row, if one exists
    async fn load_active_config(&self) -> Result<Option<EffectiveConfig>, PortError>;

    /// Total cost of successful invocations since `since`
    async fn sum_successful_cost(&self, since: DateTime<Utc>) -> Result<f64, PortError>;

    /// Append one usage record
    async fn append_usage_record(&self, record: &UsageRecord) -> Result<(), PortError>;
}

/// Key/value response cache with per-entry TTL
#[async_trait]
pub trait CachePort: Send + Sync {
    /// Value stored under `key`, if present and not expired
    async fn get(&self, key: &str) -> Result<Option<String>, PortError>;

    /// Store `value` under `key` for `ttl_secs` seconds
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), PortError>;

    /// Release the connection
    async fn close(&self) {}
}

// ============================================================================
// In-Memory Usage Store
// ============================================================================

/// Usage store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    records: Mutex<Vec<UsageRecord>>,
    seeded: Mutex<Vec<(DateTime<Utc>, f64)>>,
    active_config: Mutex<Option<EffectiveConfig>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryUsageStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with an active configuration row
    pub fn with_active_config(config: EffectiveConfig) -> Self {
        let store = Self::default();
        *store.active_config.lock() = Some(config);
        store
    }

    /// Replace the active configuration row
    pub fn set_active_config(&self, config: Option<EffectiveConfig>) {
        *self.active_config.lock() = config;
    }

    /// Record historical spend without a usage record
    pub fn seed_cost(&self, at: DateTime<Utc>, cost: f64) {
        self.seeded.lock().push((at, cost));
    }

    /// Make config and spend reads fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make usage appends fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All usage records appended so far
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().clone()
    }

    fn check_reads(&self) -> Result<(), PortError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("reads disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistencePort for InMemoryUsageStore {
    async fn load_active_config(&self) -> Result<Option<EffectiveConfig>, PortError> {
        self.check_reads()?;
        Ok(self.active_config.lock().clone())
    }

    async fn sum_successful_cost(&self, since: DateTime<Utc>) -> Result<f64, PortError> {
        self.check_reads()?;
        let recorded: f64 = self
            .records
            .lock()
            .iter()
            .filter(|r| r.success && r.created_at >= since)
            .map(|r| r.total_cost)
            .sum();
        let seeded: f64 = self
            .seeded
            .lock()
            .iter()
            .filter(|(at, _)| *at >= since)
            .map(|(_, cost)| cost)
            .sum();
        Ok(recorded + seeded)
    }

    async fn append_usage_record(&self, record: &UsageRecord) -> Result<(), PortError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("writes disabled".into()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// In-Memory Cache
// ============================================================================

/// Cache kept in process memory, expiry driven by the injected clock
#[derive(Debug)]
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
    clock: SharedClock,
    gets: AtomicU64,
    sets: AtomicU64,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryCache {
    /// Empty cache
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Shared handle
    pub fn shared(clock: SharedClock) -> Arc<Self> {
        Arc::new(Self::new(clock))
    }

    /// Number of `get` calls served
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `set_with_ttl` calls served
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make every operation fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PortError> {
        if self.failing.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("cache offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CachePort for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), PortError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let expires = self.clock.now() + Duration::from_secs(ttl_secs);
        self.entries
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.entries.clear();
    }
}
