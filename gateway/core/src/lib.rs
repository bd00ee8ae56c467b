//! Gateway Core - Resilient Multi-Provider LLM Gateway
//!
//! One call surface over several LLM vendors and local inference engines.
//! Callers hand the [`Gateway`] a [`NormalizedRequest`]; the gateway picks a
//! model, enforces spend and rate limits, isolates failing models, retries,
//! falls back, prices the result and writes exactly one usage record.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Gateway                                │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────────┐  │
//! │  │  Cache   │  │  Budget  │  │  Rate    │  │ Circuit breakers │  │
//! │  │(SHA-256) │  │  Guard   │  │  Limiter │  │  + Retry policy  │  │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────────────┘  │
//! │        │              │                              │            │
//! │   CachePort     PersistencePort                      │            │
//! └──────────────────────────┬───────────────────────────┼────────────┘
//!                            │                           │
//!                    ┌───────┴───────┐          ┌────────┴─────────┐
//!                    │  ModelRouter  │─────────►│ ProviderRegistry │
//!                    └───────────────┘          └────────┬─────────┘
//!                                                        │
//!                              ┌──────────────┬──────────┴───┐
//!                              │    OpenAI    │  Anthropic   │  Ollama
//!                              └──────────────┴──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use gateway_core::{
//!     Gateway, GatewayDeps, NormalizedRequest, ProviderCredentials, ProviderFactory,
//!     ProviderRegistry, TaskType,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(ProviderRegistry::new());
//!     let gateway = Gateway::new(GatewayDeps::new(registry));
//!
//!     let providers = ProviderFactory::from_credentials(&ProviderCredentials::from_env());
//!     gateway.on_init(providers).await;
//!
//!     let request = NormalizedRequest::from_prompt("Summarize this")
//!         .with_task_type(TaskType::Summarization);
//!     match gateway.invoke(&request).await {
//!         Ok(response) => println!("{}", response.content),
//!         Err(e) => eprintln!("{}: {e}", e.name()),
//!     }
//!
//!     gateway.on_shutdown().await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`provider`]: the `Provider` trait and the OpenAI, Anthropic and Ollama clients
//! - [`registry`]: provider lifecycle and background health checks
//! - [`router`]: model selection and fallback ranking
//! - [`gateway`]: the invocation pipeline
//! - [`resilience`]: circuit breakers, retry, token bucket, budget guard
//! - [`cache`]: request fingerprints and the response cache
//! - [`usage`]: cost computation and usage records
//! - [`ports`]: persistence and cache seams, with in-memory implementations
//! - [`config`]: configuration types, loading and validation
//! - [`metrics`]: counters and latency histogram

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod ports;
pub mod provider;
pub mod registry;
pub mod resilience;
pub mod router;
pub mod types;
pub mod usage;

// Re-exports for convenience
pub use cache::{fingerprint, ResponseCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{GatewayError, InvocationError, InvocationErrorKind};
pub use gateway::{Gateway, GatewayDeps};
pub use metrics::{GatewayMetrics, GatewayMetricsSnapshot};
pub use ports::{CachePort, InMemoryCache, InMemoryUsageStore, PersistencePort, PortError};
pub use provider::{
    AnthropicProvider, ModelCapabilities, OllamaProvider, OpenAiProvider, Provider,
    ProviderCredentials, ProviderDescriptor, ProviderHealth, ProviderHealthStatus,
};
pub use registry::{AvailableModel, ProviderFactory, ProviderRegistry, ProviderStatus, RegistryError};
pub use router::{CostEstimate, ModelRouter, RouterError, RoutingDecision, RoutingMode};
pub use types::{
    validate_request, BudgetMode, ChatMessage, CostBreakdown, FinishReason, InvocationControls,
    MessageRole, ModelRef, NormalizedRequest, NormalizedResponse, RequestMetadata, RequestOptions,
    TaskType, TokenUsage, ToolCall, ToolDefinition,
};
pub use usage::{compute_cost, UsageRecord};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BudgetConfig, CacheConfig,
    CircuitBreakerConfig, ConfigError, ConfigOverrides, ConfigSource, EffectiveConfig,
    LoadedConfig, ObservabilityConfig, RateLimitConfig, RetryConfig,
};
