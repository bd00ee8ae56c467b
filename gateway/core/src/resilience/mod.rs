//! Resilience primitives
//!
//! Admission control and failure isolation used by the gateway:
//!
//! - [`budget`]: daily/monthly spend limits (UTC windows)
//! - [`rate_limit`]: token bucket with a bounded wait queue
//! - [`retry`]: exponential backoff for the primary model
//! - [`circuit_breaker`]: per provider+model failure isolation

pub mod budget;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

pub use budget::{BudgetGuard, BudgetStatus, BudgetWindow};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
pub use rate_limit::{RateLimitMetrics, RateLimitResult, RateLimiter};
pub use retry::RetryPolicy;
