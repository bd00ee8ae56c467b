//! Retry policy for the primary model
//!
//! Delay before retry `n` (0-indexed) is
//! `min(max_delay, initial_delay * backoff_multiplier^n)`, with optional
//! jitter of up to 25% that never pushes the delay past `max_delay`.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{InvocationError, InvocationErrorKind};

/// Decides whether and when a failed call is retried
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self, skip_retries: bool) -> u32 {
        if !self.config.enabled || skip_retries {
            0
        } else {
            self.config.max_retries
        }
    }

    /// Calculate backoff duration for retry N (0-indexed)
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        let cap = self.config.max_delay_ms as f64;

        let delay_ms = if self.config.jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            (base * (1.0 + jitter)).min(cap)
        } else {
            base.min(cap)
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Check if a status code should trigger a retry
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.config.retryable_status_codes.contains(&status)
    }

    /// Whether the error is worth another attempt on the same model
    pub fn is_retryable(&self, err: &InvocationError) -> bool {
        match &err.kind {
            InvocationErrorKind::Timeout => true,
            InvocationErrorKind::Http { status } => self.should_retry_status(*status),
            InvocationErrorKind::Network { code } => self
                .config
                .retryable_errors
                .iter()
                .any(|e| e.eq_ignore_ascii_case(code) || e.eq_ignore_ascii_case("network")),
            InvocationErrorKind::UnsupportedModel
            | InvocationErrorKind::InvalidResponse
            | InvocationErrorKind::Cancelled
            | InvocationErrorKind::Configuration => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_delay_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms,
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn test_exponential_delays() {
        let p = policy(30_000);
        let delays: Vec<_> = (0..3).map(|n| p.delay_for_attempt(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
    }

    #[test]
    fn test_delays_capped() {
        let p = policy(3000);
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(3000));
        assert_eq!(p.delay_for_attempt(30), Duration::from_millis(3000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = RetryPolicy::new(RetryConfig {
            jitter: true,
            max_delay_ms: 2200,
            ..RetryConfig::default()
        });
        for _ in 0..100 {
            let d = p.delay_for_attempt(1).as_millis();
            assert!((2000..=2200).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_skip_and_disabled() {
        let p = policy(30_000);
        assert_eq!(p.max_retries(false), 3);
        assert_eq!(p.max_retries(true), 0);

        let disabled = RetryPolicy::new(RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        });
        assert_eq!(disabled.max_retries(false), 0);
    }

    #[test]
    fn test_retryable_classification() {
        let p = RetryPolicy::new(RetryConfig {
            retryable_errors: vec!["ECONNRESET".into()],
            ..RetryConfig::default()
        });
        let err = |kind| InvocationError::new("openai", "gpt-5", kind, "x");

        assert!(p.is_retryable(&err(InvocationErrorKind::Timeout)));
        assert!(p.is_retryable(&err(InvocationErrorKind::Http { status: 503 })));
        assert!(!p.is_retryable(&err(InvocationErrorKind::Http { status: 400 })));
        assert!(p.is_retryable(&err(InvocationErrorKind::Network {
            code: "ECONNRESET".into()
        })));
        assert!(!p.is_retryable(&err(InvocationErrorKind::Network {
            code: "ECONNREFUSED".into()
        })));
        assert!(!p.is_retryable(&err(InvocationErrorKind::Cancelled)));
        assert!(!p.is_retryable(&err(InvocationErrorKind::UnsupportedModel)));
    }
}
