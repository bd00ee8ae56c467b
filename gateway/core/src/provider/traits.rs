//! Provider Traits
//!
//! The [`Provider`] trait is the narrow seam between the gateway and one LLM
//! vendor. Implementations supply the vendor call ([`Provider::send`]) and a
//! cheap liveness call ([`Provider::probe`]); the provided methods layer the
//! shared behaviour on top:
//!
//! - model validation against the descriptor's model table
//! - latency / last-success / last-error bookkeeping on every call
//! - a TTL-cached availability probe that is cheap enough to call per request

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::descriptor::{ModelCapabilities, ProviderDescriptor};
use super::health::{ProviderHealth, ProviderHealthStatus};
use crate::error::InvocationError;
use crate::types::{NormalizedRequest, NormalizedResponse};

/// How long a probe result is trusted
pub const DEFAULT_AVAILABILITY_TTL: Duration = Duration::from_secs(30);

/// Characters per token when no vendor tokenizer is available
const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count of `text`
pub fn approximate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// LLM provider trait
///
/// Implement this trait to add support for another vendor.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Identity and model table
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Health state owned by this provider
    fn health(&self) -> &ProviderHealth;

    /// Perform the vendor call for an already-validated `model`
    async fn send(
        &self,
        request: &NormalizedRequest,
        model: &str,
    ) -> Result<NormalizedResponse, InvocationError>;

    /// Cheapest possible liveness call (model list or ping)
    async fn probe(&self) -> Result<(), InvocationError>;

    /// Unique provider id
    fn name(&self) -> &str {
        self.descriptor().name()
    }

    /// How long a probe result stays cached
    fn availability_ttl(&self) -> Duration {
        DEFAULT_AVAILABILITY_TTL
    }

    /// Invoke using the request's model override, else the default model
    async fn invoke(&self, request: &NormalizedRequest) -> Result<NormalizedResponse, InvocationError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.descriptor().default_model().to_string());
        self.invoke_model(request, &model).await
    }

    /// Invoke a specific model with health bookkeeping
    async fn invoke_model(
        &self,
        request: &NormalizedRequest,
        model: &str,
    ) -> Result<NormalizedResponse, InvocationError> {
        if let Err(err) = self.descriptor().validate_model(model) {
            self.health().record_failure(err.message.clone());
            return Err(err);
        }

        let started = Instant::now();
        match self.send(request, model).await {
            Ok(mut response) => {
                let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                response.latency_ms = latency_ms;
                self.health().record_success(latency_ms);
                Ok(response)
            }
            Err(err) => {
                tracing::debug!(
                    provider = %self.name(),
                    model = %model,
                    error = %err.message,
                    "Provider call failed"
                );
                self.health().record_failure(err.message.clone());
                Err(err)
            }
        }
    }

    /// [`Provider::invoke_model`] bounded by `timeout`
    ///
    /// An expired deadline counts as a failed call in this provider's health.
    async fn invoke_with_timeout(
        &self,
        request: &NormalizedRequest,
        model: &str,
        timeout: Duration,
    ) -> Result<NormalizedResponse, InvocationError> {
        match tokio::time::timeout(timeout, self.invoke_model(request, model)).await {
            Ok(result) => result,
            Err(_) => {
                let err = InvocationError::timeout(self.name(), model, timeout);
                tracing::debug!(provider = %self.name(), model = %model, "Provider call timed out");
                self.health().record_failure(err.message.clone());
                Err(err)
            }
        }
    }

    /// Cached liveness check, safe to call before every request
    async fn is_available(&self) -> bool {
        let now = Instant::now();
        if let Some(cached) = self
            .health()
            .cached_availability(now, self.availability_ttl())
        {
            return cached;
        }

        let available = match self.probe().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(provider = %self.name(), error = %err, "Availability probe failed");
                false
            }
        };
        self.health().record_probe(available, now);
        available
    }

    /// Capabilities of `model`, if served here
    fn model_capabilities(&self, model: &str) -> Option<ModelCapabilities> {
        self.descriptor().capabilities(model)
    }

    /// Approximate token count (~4 characters per token)
    fn token_count(&self, text: &str) -> usize {
        approximate_tokens(text)
    }

    /// Health snapshot
    fn health_status(&self) -> ProviderHealthStatus {
        self.health().snapshot()
    }

    /// One-time setup; the default probes once to seed availability
    async fn initialize(&self) -> Result<(), InvocationError> {
        let available = self.is_available().await;
        tracing::info!(provider = %self.name(), available, "Provider initialized");
        Ok(())
    }

    /// Release resources
    async fn shutdown(&self) {
        tracing::debug!(provider = %self.name(), "Provider shut down");
    }
}

/// Credentials and endpoints read from the environment
///
/// A provider registers only when its credential is present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible base URL override
    pub openai_base_url: Option<String>,
    /// Anthropic API key
    pub anthropic_api_key: Option<String>,
    /// Local Ollama base URL
    pub ollama_base_url: Option<String>,
}

impl ProviderCredentials {
    /// Read credentials from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through an arbitrary lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ollama_base_url = non_empty("OLLAMA_BASE_URL").or_else(|| {
            non_empty("OLLAMA_HOST").map(|host| {
                if host.starts_with("http://") || host.starts_with("https://") {
                    host
                } else {
                    let port = non_empty("OLLAMA_PORT")
                        .and_then(|p| p.parse::<u16>().ok())
                        .unwrap_or(11434);
                    format!("http://{host}:{port}")
                }
            })
        });

        Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL"),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            ollama_base_url,
        }
    }
}
