//! Error taxonomy surfaced to gateway callers
//!
//! Admission-control failures ([`GatewayError::BudgetExceeded`],
//! [`GatewayError::RateLimitExceeded`]) are raised before any provider is
//! contacted. [`InvocationError`] carries the vendor-level failure of a single
//! provider call and is what the retry policy and circuit breaker inspect.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::resilience::budget::BudgetWindow;

// ============================================================================
// Provider Invocation Errors
// ============================================================================

/// What went wrong inside a single provider call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvocationErrorKind {
    /// Transport-level failure, `code` is a symbolic errno-style code
    /// (`ECONNREFUSED`, `ECONNRESET`, ...)
    Network {
        /// Symbolic error code matched against `retry.retryable_errors`
        code: String,
    },
    /// The call did not finish within its deadline
    Timeout,
    /// The vendor answered with a non-success HTTP status
    Http {
        /// HTTP status code
        status: u16,
    },
    /// The requested model is not served by this provider
    UnsupportedModel,
    /// The vendor payload could not be decoded
    InvalidResponse,
    /// The caller cancelled the invocation
    Cancelled,
    /// Provider is misconfigured (bad URL, empty credential)
    Configuration,
}

impl InvocationErrorKind {
    /// Short stable label, stored on usage records
    pub fn label(&self) -> String {
        match self {
            Self::Network { code } => format!("network:{code}"),
            Self::Timeout => "timeout".to_string(),
            Self::Http { status } => format!("http:{status}"),
            Self::UnsupportedModel => "unsupported_model".to_string(),
            Self::InvalidResponse => "invalid_response".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Configuration => "configuration".to_string(),
        }
    }
}

/// Failure of one provider call, carrying the vendor's message
#[derive(Clone, Debug, Error)]
#[error("{provider}/{model}: {message}")]
pub struct InvocationError {
    /// Provider that produced the error
    pub provider: String,
    /// Model that was being invoked
    pub model: String,
    /// Classification used by retry and fallback decisions
    pub kind: InvocationErrorKind,
    /// Human-readable message, usually the vendor's own
    pub message: String,
}

impl InvocationError {
    /// Create a new invocation error
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        kind: InvocationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            kind,
            message: message.into(),
        }
    }

    /// Timeout after `after`
    pub fn timeout(provider: &str, model: &str, after: Duration) -> Self {
        Self::new(
            provider,
            model,
            InvocationErrorKind::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }

    /// Caller cancelled the invocation
    pub fn cancelled(provider: &str, model: &str) -> Self {
        Self::new(
            provider,
            model,
            InvocationErrorKind::Cancelled,
            "invocation cancelled by caller",
        )
    }

    /// Map a reqwest failure onto the invocation taxonomy
    pub fn from_reqwest(provider: &str, model: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            InvocationErrorKind::Timeout
        } else if err.is_connect() {
            InvocationErrorKind::Network {
                code: "ECONNREFUSED".to_string(),
            }
        } else if err.is_decode() {
            InvocationErrorKind::InvalidResponse
        } else if let Some(status) = err.status() {
            InvocationErrorKind::Http {
                status: status.as_u16(),
            }
        } else {
            InvocationErrorKind::Network {
                code: "ECONNRESET".to_string(),
            }
        };
        Self::new(provider, model, kind, err.to_string())
    }

    /// Whether the caller cancelled this call
    pub fn is_cancelled(&self) -> bool {
        self.kind == InvocationErrorKind::Cancelled
    }
}

// ============================================================================
// Gateway Errors
// ============================================================================

/// Terminal outcome of a failed [`crate::Gateway::invoke`]
#[derive(Clone, Debug, Error)]
pub enum GatewayError {
    /// Spend plus the request's worst-case estimate would exceed a limit
    #[error(
        "{window} budget exceeded: spent ${spent:.4} + estimated ${estimated:.4} exceeds limit ${limit:.2} (remaining ${remaining:.4})"
    )]
    BudgetExceeded {
        /// Which limit tripped
        window: BudgetWindow,
        /// Spend so far in the window
        spent: f64,
        /// Worst-case estimate for this request
        estimated: f64,
        /// Configured limit for the window
        limit: f64,
        /// Headroom left before the limit (never negative)
        remaining: f64,
    },

    /// Token bucket empty and no queue slot available
    #[error("rate limit exceeded, retry after {}ms", retry_after.as_millis())]
    RateLimitExceeded {
        /// Estimated wait before a token is available
        retry_after: Duration,
    },

    /// No registered, available provider serves the model
    #[error("no provider available for model '{model}'")]
    NoProviderAvailable {
        /// The model that could not be served
        model: String,
    },

    /// Every attempt failed, this is the last provider error
    #[error(transparent)]
    Provider(#[from] InvocationError),

    /// The request failed boundary validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Stable type name for caller-side matching across process boundaries
    pub fn name(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "BudgetExceededError",
            Self::RateLimitExceeded { .. } => "RateLimitExceededError",
            Self::NoProviderAvailable { .. } => "NoProviderAvailableError",
            Self::Provider(_) => "ProviderInvocationError",
            Self::InvalidRequest(_) => "InvalidRequestError",
        }
    }

    /// Whether this was rejected by admission control
    pub fn is_admission_control(&self) -> bool {
        matches!(
            self,
            Self::BudgetExceeded { .. } | Self::RateLimitExceeded { .. }
        )
    }

    /// Label stored in `UsageRecord::error_kind`
    pub fn kind_label(&self) -> String {
        match self {
            Self::Provider(err) => err.kind.label(),
            other => other.name().to_string(),
        }
    }
}

/// Which side of a provider call produced a failure, for logging
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptRole {
    /// The routed primary model
    Primary,
    /// A model from the fallback chain
    Fallback,
}

impl fmt::Display for AttemptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}
