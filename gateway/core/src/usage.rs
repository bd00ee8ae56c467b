//! Usage accounting
//!
//! Every gateway invocation ends with exactly one [`UsageRecord`], whatever
//! the outcome. Records are append-only and written through the persistence
//! port; a failed write is logged and never replaces the invocation's result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::ports::PersistencePort;
use crate::provider::ModelCapabilities;
use crate::types::{CostBreakdown, NormalizedRequest, NormalizedResponse, TokenUsage};

/// `input * cost_per_input_token + output * cost_per_output_token`
pub fn compute_cost(usage: &TokenUsage, capabilities: &ModelCapabilities) -> CostBreakdown {
    capabilities.cost_for(usage)
}

/// One invocation's usage and outcome
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record id
    pub id: uuid::Uuid,
    /// Caller correlation id
    pub request_id: String,
    /// Provider that served (or last failed) the call
    pub provider: String,
    /// Model that served (or last failed) the call
    pub model: String,
    /// Prompt tokens
    pub input_tokens: u32,
    /// Completion tokens
    pub output_tokens: u32,
    /// Sum of both
    pub total_tokens: u32,
    /// Cost of prompt tokens in USD
    pub input_cost: f64,
    /// Cost of completion tokens in USD
    pub output_cost: f64,
    /// Total cost in USD
    pub total_cost: f64,
    /// End-to-end latency in milliseconds
    pub latency_ms: u64,
    /// Served from cache
    pub cache_hit: bool,
    /// Retries spent on the primary model
    pub retry_count: u32,
    /// The primary was skipped because its breaker was open
    pub circuit_breaker_open: bool,
    /// Served by a fallback model
    pub fallback_used: bool,
    /// Calling agent
    pub agent_name: Option<String>,
    /// Purpose label
    pub purpose: Option<String>,
    /// Whether a response was returned
    pub success: bool,
    /// Terminal error message on failure
    pub error_message: Option<String>,
    /// Terminal error type on failure
    pub error_kind: Option<String>,
    /// When the invocation finished
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Blank failed record; callers fill in what they know
    pub fn new(
        request_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            request_id: request_id.into(),
            provider: provider.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            input_cost: 0.0,
            output_cost: 0.0,
            total_cost: 0.0,
            latency_ms: 0,
            cache_hit: false,
            retry_count: 0,
            circuit_breaker_open: false,
            fallback_used: false,
            agent_name: None,
            purpose: None,
            success: false,
            error_message: None,
            error_kind: None,
            created_at,
        }
    }

    /// Record for a successful response
    pub fn success(
        request: &NormalizedRequest,
        response: &NormalizedResponse,
        circuit_breaker_open: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        let cost = response.cost.unwrap_or_default();
        Self {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            total_tokens: response.usage.total_tokens,
            input_cost: cost.input_cost,
            output_cost: cost.output_cost,
            total_cost: cost.total_cost,
            latency_ms: response.latency_ms,
            cache_hit: response.cache_hit,
            retry_count: response.retry_count,
            circuit_breaker_open,
            fallback_used: response.fallback_used,
            agent_name: request.metadata.agent_name.clone(),
            purpose: request.metadata.purpose.clone(),
            success: true,
            ..Self::new(
                request.metadata.request_id.clone(),
                response.provider.clone(),
                response.model.clone(),
                created_at,
            )
        }
    }

    /// Record for a terminal failure
    pub fn failure(
        request: &NormalizedRequest,
        provider: &str,
        model: &str,
        error: &GatewayError,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_name: request.metadata.agent_name.clone(),
            purpose: request.metadata.purpose.clone(),
            error_message: Some(error.to_string()),
            error_kind: Some(error.kind_label()),
            ..Self::new(request.metadata.request_id.clone(), provider, model, created_at)
        }
    }
}

/// Writes usage records, swallowing persistence failures
#[derive(Clone, Default)]
pub struct UsageRecorder {
    port: Option<Arc<dyn PersistencePort>>,
}

impl std::fmt::Debug for UsageRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRecorder")
            .field("port", &self.port.is_some())
            .finish()
    }
}

impl UsageRecorder {
    /// Recorder over an optional port
    pub fn new(port: Option<Arc<dyn PersistencePort>>) -> Self {
        Self { port }
    }

    /// Append `record`; failures are logged, never returned
    pub async fn record(&self, record: &UsageRecord) {
        let Some(port) = &self.port else {
            tracing::debug!(request_id = %record.request_id, "No persistence port, usage not stored");
            return;
        };
        if let Err(err) = port.append_usage_record(record).await {
            tracing::warn!(
                request_id = %record.request_id,
                error = %err,
                "Failed to persist usage record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryUsageStore;

    fn caps() -> ModelCapabilities {
        ModelCapabilities {
            cost_per_input_token: 0.000_000_05,
            cost_per_output_token: 0.000_000_4,
            ..ModelCapabilities::local(8192)
        }
    }

    #[test]
    fn test_compute_cost() {
        let cost = compute_cost(&TokenUsage::new(100, 50), &caps());
        assert!((cost.total_cost - 0.000_025).abs() < 1e-6);
    }

    #[test]
    fn test_success_record_copies_response() {
        let request = NormalizedRequest::from_prompt("hi")
            .with_agent("reconciler")
            .with_purpose("diff-summary");
        let response = NormalizedResponse {
            provider: "openai".into(),
            model: "gpt-5-nano".into(),
            usage: TokenUsage::new(100, 50),
            cost: Some(compute_cost(&TokenUsage::new(100, 50), &caps())),
            retry_count: 2,
            latency_ms: 321,
            ..Default::default()
        };

        let record = UsageRecord::success(&request, &response, true, Utc::now());
        assert!(record.success);
        assert_eq!(record.total_tokens, 150);
        assert_eq!(record.retry_count, 2);
        assert!(record.circuit_breaker_open);
        assert_eq!(record.agent_name.as_deref(), Some("reconciler"));
        assert_eq!(record.request_id, request.metadata.request_id);
    }

    #[test]
    fn test_failure_record() {
        let request = NormalizedRequest::from_prompt("hi");
        let err = GatewayError::NoProviderAvailable {
            model: "gpt-5".into(),
        };
        let record = UsageRecord::failure(&request, "openai", "gpt-5", &err, Utc::now());
        assert!(!record.success);
        assert_eq!(record.error_kind.as_deref(), Some("NoProviderAvailableError"));
        assert!(record.error_message.unwrap().contains("gpt-5"));
    }

    #[tokio::test]
    async fn test_recorder_swallows_failures() {
        let store = Arc::new(InMemoryUsageStore::new());
        store.fail_writes(true);
        let recorder = UsageRecorder::new(Some(store.clone() as Arc<dyn PersistencePort>));
        recorder
            .record(&UsageRecord::new("r", "p", "m", Utc::now()))
            .await;
        assert!(store.records().is_empty());

        UsageRecorder::new(None)
            .record(&UsageRecord::new("r", "p", "m", Utc::now()))
            .await;
    }
}
