//! Resilient Gateway
//!
//! Single entry point for LLM calls. Each [`Gateway::invoke`] runs:
//!
//! ```text
//! validate ─► cache ─► route ─► budget ─► rate limit
//!                                             │
//!            ┌────────────────────────────────┘
//!            ▼
//!   primary (breaker + retry) ─► fallbacks (one attempt each)
//!            │
//!            ▼
//!   cost ─► usage record (exactly one) ─► cache write
//! ```
//!
//! Routing happens before the budget check so the worst-case estimate can
//! account for every model the request might end up on. The router is pure,
//! so this ordering has no side effects.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::ResponseCache;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{ConfigSource, EffectiveConfig};
use crate::error::{AttemptRole, GatewayError, InvocationError};
use crate::metrics::{GatewayMetrics, GatewayMetricsSnapshot};
use crate::ports::{CachePort, PersistencePort};
use crate::provider::{approximate_tokens, ModelCapabilities, Provider};
use crate::registry::{AvailableModel, ProviderRegistry, ProviderStatus};
use crate::resilience::{
    BudgetGuard, CircuitBreakerRegistry, CircuitSnapshot, RateLimitMetrics, RateLimiter,
    RetryPolicy,
};
use crate::router::{CostEstimate, ModelRouter, RouterError, RoutingDecision};
use crate::types::{
    validate_request, BudgetMode, CostBreakdown, ModelRef, NormalizedRequest, NormalizedResponse,
    TaskType,
};
use crate::usage::{compute_cost, UsageRecord, UsageRecorder};

/// Output tokens assumed for budgeting when a request sets no `max_tokens`
pub const DEFAULT_ESTIMATED_OUTPUT_TOKENS: u32 = 4096;

/// Provider/model recorded when a request fails before routing
const UNROUTED: &str = "unrouted";

/// Collaborators injected into a [`Gateway`]
#[derive(Clone)]
pub struct GatewayDeps {
    /// Provider registry
    pub registry: Arc<ProviderRegistry>,
    /// Usage store and active-config source
    pub persistence: Option<Arc<dyn PersistencePort>>,
    /// Response cache store
    pub cache: Option<Arc<dyn CachePort>>,
    /// Time source
    pub clock: SharedClock,
}

impl GatewayDeps {
    /// Registry only: no persistence, no cache, system clock
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            persistence: None,
            cache: None,
            clock: SystemClock::shared(),
        }
    }

    /// Attach a persistence port
    #[must_use]
    pub fn with_persistence(mut self, port: Arc<dyn PersistencePort>) -> Self {
        self.persistence = Some(port);
        self
    }

    /// Attach a cache port
    #[must_use]
    pub fn with_cache(mut self, port: Arc<dyn CachePort>) -> Self {
        self.cache = Some(port);
        self
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

/// Per-config machinery, swapped wholesale on reload
#[derive(Debug)]
struct Runtime {
    config: EffectiveConfig,
    source: ConfigSource,
    retry: RetryPolicy,
    rate_limiter: RateLimiter,
    budget: BudgetGuard,
    cache: ResponseCache,
}

impl Runtime {
    fn build(
        config: EffectiveConfig,
        source: ConfigSource,
        deps: &GatewayDeps,
    ) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit.clone(), Arc::clone(&deps.clock)),
            budget: BudgetGuard::new(config.budget.clone()),
            cache: ResponseCache::new(deps.cache.clone(), config.cache.clone()),
            config,
            source,
        }
    }
}

/// Successful invocation before bookkeeping
struct Served {
    response: NormalizedResponse,
    circuit_breaker_open: bool,
}

/// Failed invocation before bookkeeping
struct Failed {
    error: GatewayError,
    provider: String,
    model: String,
    circuit_breaker_open: bool,
    retry_count: u32,
    fallback_used: bool,
}

impl Failed {
    fn at(error: GatewayError, target: &ModelRef) -> Self {
        Self {
            error,
            provider: target.provider.clone(),
            model: target.model.clone(),
            circuit_breaker_open: false,
            retry_count: 0,
            fallback_used: false,
        }
    }

    fn unrouted(error: GatewayError, request: &NormalizedRequest) -> Self {
        Self {
            error,
            provider: request
                .controls
                .force_provider
                .clone()
                .unwrap_or_else(|| UNROUTED.to_string()),
            model: request.model.clone().unwrap_or_else(|| UNROUTED.to_string()),
            circuit_breaker_open: false,
            retry_count: 0,
            fallback_used: false,
        }
    }
}

/// Outcome of the primary attempt loop
struct PrimaryOutcome {
    result: Option<Result<NormalizedResponse, InvocationError>>,
    circuit_breaker_open: bool,
    retry_count: u32,
}

/// Multi-provider LLM gateway
pub struct Gateway {
    deps: GatewayDeps,
    router: ModelRouter,
    recorder: UsageRecorder,
    breakers: CircuitBreakerRegistry,
    metrics: GatewayMetrics,
    static_config: EffectiveConfig,
    runtime: RwLock<Arc<Runtime>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.deps.registry)
            .field("persistence", &self.deps.persistence.is_some())
            .field("cache", &self.deps.cache.is_some())
            .field("source", &self.runtime().source)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Gateway on built-in defaults until [`Gateway::on_init`] runs
    pub fn new(deps: GatewayDeps) -> Self {
        Self::with_config(deps, EffectiveConfig::default())
    }

    /// Gateway whose static fallback config is `config`
    ///
    /// `config` is used until `on_init`, and whenever no active config is
    /// persisted.
    pub fn with_config(deps: GatewayDeps, config: EffectiveConfig) -> Self {
        let runtime = Runtime::build(config.clone(), ConfigSource::Default, &deps);
        Self {
            router: ModelRouter::new(Arc::clone(&deps.registry)),
            recorder: UsageRecorder::new(deps.persistence.clone()),
            breakers: CircuitBreakerRegistry::new(
                config.circuit_breaker.clone(),
                Arc::clone(&deps.clock),
            ),
            metrics: GatewayMetrics::new(),
            static_config: config,
            runtime: RwLock::new(Arc::new(runtime)),
            deps,
        }
    }

    fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(&self.runtime.read())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Load the active config and bring providers up
    ///
    /// Providers already in the registry are kept; `providers` are
    /// initialized alongside them.
    pub async fn on_init(&self, providers: Vec<Arc<dyn Provider>>) -> ConfigSource {
        let source = self.reload_config().await;
        let interval = self.runtime().config.health_check_interval();
        self.deps.registry.initialize(providers, interval).await;

        tracing::info!(
            source = %source,
            providers = ?self.deps.registry.names(),
            "Gateway initialized"
        );
        source
    }

    /// Re-read the active config from persistence
    ///
    /// Missing, unreadable or invalid config falls back to the static config.
    pub async fn reload_config(&self) -> ConfigSource {
        let (config, source) = match self.load_active_config().await {
            Some(config) => (config, ConfigSource::Persisted),
            None => (self.static_config.clone(), ConfigSource::Default),
        };

        self.breakers.reconfigure(config.circuit_breaker.clone());
        let runtime = Runtime::build(config, source, &self.deps);
        *self.runtime.write() = Arc::new(runtime);
        source
    }

    async fn load_active_config(&self) -> Option<EffectiveConfig> {
        let Some(port) = &self.deps.persistence else {
            tracing::warn!("No persistence port, using static gateway config");
            return None;
        };

        match port.load_active_config().await {
            Ok(Some(config)) => match config.validate() {
                Ok(()) => Some(config),
                Err(e) => {
                    tracing::warn!(error = %e, "Active gateway config invalid, using static config");
                    None
                }
            },
            Ok(None) => {
                tracing::warn!("No active gateway config persisted, using static config");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load active gateway config, using static config");
                None
            }
        }
    }

    /// Release cache, limiter, breakers and providers
    ///
    /// Safe to call without `on_init`, and more than once.
    pub async fn on_shutdown(&self) {
        let runtime = self.runtime();
        runtime.cache.close().await;
        runtime.rate_limiter.reset();
        self.breakers.clear();
        self.deps.registry.shutdown().await;
        tracing::info!("Gateway shut down");
    }

    // ------------------------------------------------------------------------
    // Read-only helpers
    // ------------------------------------------------------------------------

    /// Config currently in effect
    pub fn current_config(&self) -> EffectiveConfig {
        self.runtime().config.clone()
    }

    /// Where the current config came from
    pub fn config_source(&self) -> ConfigSource {
        self.runtime().source
    }

    /// Gateway counters
    pub fn metrics(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Circuit breaker states
    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshots()
    }

    /// Token bucket counters
    pub fn rate_limit_metrics(&self) -> RateLimitMetrics {
        self.runtime().rate_limiter.metrics()
    }

    /// Names of registered providers that are currently available
    pub async fn available_providers(&self) -> Vec<String> {
        let mut names = Vec::new();
        for provider in self.deps.registry.providers() {
            if provider.is_available().await {
                names.push(provider.name().to_string());
            }
        }
        names
    }

    /// Status row per registered provider
    pub async fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.deps.registry.provider_statuses().await
    }

    /// Capabilities of `model`
    pub fn model_capabilities(&self, model: &str) -> Option<ModelCapabilities> {
        self.deps.registry.model_capabilities(model)
    }

    /// Pre-flight cost of `task` on the model the router would pick
    pub fn estimate_task_cost(
        &self,
        task: TaskType,
        input_tokens: u64,
        output_tokens: u64,
        mode: Option<BudgetMode>,
    ) -> Result<CostEstimate, RouterError> {
        self.router
            .estimate_task_cost(task, input_tokens, output_tokens, mode)
    }

    /// Models recommended for `task`, best first
    pub fn recommended_models(&self, task: TaskType, mode: Option<BudgetMode>) -> Vec<AvailableModel> {
        self.router.recommended_models(task, mode)
    }

    // ------------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------------

    /// Serve one request
    ///
    /// Writes exactly one usage record whatever the outcome.
    ///
    /// # Errors
    ///
    /// `InvalidRequest`, `BudgetExceeded`, `RateLimitExceeded`,
    /// `NoProviderAvailable`, or the last provider error once every model in
    /// the chain has failed.
    pub async fn invoke(&self, request: &NormalizedRequest) -> Result<NormalizedResponse, GatewayError> {
        let runtime = self.runtime();
        if runtime.config.observability.tracing_enabled {
            let span = tracing::info_span!(
                "invoke",
                request_id = %request.metadata.request_id,
                agent = request.metadata.agent_name.as_deref().unwrap_or("-"),
            );
            self.invoke_with(&runtime, request).instrument(span).await
        } else {
            self.invoke_with(&runtime, request).await
        }
    }

    async fn invoke_with(
        &self,
        runtime: &Runtime,
        request: &NormalizedRequest,
    ) -> Result<NormalizedResponse, GatewayError> {
        let metrics_on = runtime.config.observability.metrics_enabled;
        let started = self.deps.clock.now();
        if metrics_on {
            self.metrics.record_invocation();
        }

        let outcome = self.execute(runtime, request).await;
        let elapsed_ms = u64::try_from(
            self.deps
                .clock
                .now()
                .saturating_duration_since(started)
                .as_millis(),
        )
        .unwrap_or(u64::MAX);

        match outcome {
            Ok(served) => {
                let record = UsageRecord::success(
                    request,
                    &served.response,
                    served.circuit_breaker_open,
                    self.deps.clock.utc_now(),
                );
                self.recorder.record(&record).await;

                if !served.response.cache_hit {
                    runtime.cache.store(request, &served.response).await;
                }
                if metrics_on {
                    self.metrics.record_success(
                        served.response.latency_ms,
                        served.response.cache_hit,
                        served.response.fallback_used,
                    );
                }
                tracing::info!(
                    provider = %served.response.provider,
                    model = %served.response.model,
                    latency_ms = served.response.latency_ms,
                    cache_hit = served.response.cache_hit,
                    fallback_used = served.response.fallback_used,
                    retries = served.response.retry_count,
                    "Request served"
                );
                Ok(served.response)
            }
            Err(failed) => {
                let mut record = UsageRecord::failure(
                    request,
                    &failed.provider,
                    &failed.model,
                    &failed.error,
                    self.deps.clock.utc_now(),
                );
                record.latency_ms = elapsed_ms;
                record.retry_count = failed.retry_count;
                record.circuit_breaker_open = failed.circuit_breaker_open;
                record.fallback_used = failed.fallback_used;
                self.recorder.record(&record).await;

                if metrics_on {
                    match &failed.error {
                        GatewayError::BudgetExceeded { .. } => self.metrics.record_budget_rejection(),
                        GatewayError::RateLimitExceeded { .. } => {
                            self.metrics.record_rate_limit_rejection();
                        }
                        GatewayError::Provider(e) if e.is_cancelled() => {
                            self.metrics.record_cancellation();
                        }
                        _ => {}
                    }
                    self.metrics.record_failure(elapsed_ms);
                }
                tracing::warn!(
                    provider = %failed.provider,
                    model = %failed.model,
                    error = %failed.error,
                    kind = failed.error.name(),
                    "Request failed"
                );
                Err(failed.error)
            }
        }
    }

    async fn execute(&self, runtime: &Runtime, request: &NormalizedRequest) -> Result<Served, Failed> {
        validate_request(request).map_err(|e| Failed::unrouted(e, request))?;
        let cancel = request.controls.cancel.as_ref();

        if let Some(mut cached) = runtime.cache.lookup(request).await {
            tracing::debug!(model = %cached.model, "Cache hit");
            // Nothing was spent on this call
            cached.cost = Some(CostBreakdown::default());
            return Ok(Served {
                response: cached,
                circuit_breaker_open: false,
            });
        }

        let decision = match self.router.route(request) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "Routing failed, falling back to configured models");
                self.router.legacy_decision(&runtime.config, &e)
            }
        };
        let primary = decision.primary();

        let estimate = self.worst_case_cost(&decision, request);
        runtime
            .budget
            .check(self.deps.persistence.as_deref(), self.deps.clock.utc_now(), estimate)
            .await
            .map_err(|e| Failed::at(e, &primary))?;

        if runtime.config.rate_limit.enabled && !request.controls.bypass_rate_limit {
            let waited = match cancel {
                Some(token) => tokio::select! {
                    () = token.cancelled() => Err(GatewayError::Provider(
                        InvocationError::cancelled(&primary.provider, &primary.model),
                    )),
                    r = runtime.rate_limiter.acquire() => r,
                },
                None => runtime.rate_limiter.acquire().await,
            }
            .map_err(|e| Failed::at(e, &primary))?;
            if !waited.is_zero() {
                tracing::debug!(waited_ms = waited.as_millis() as u64, "Rate limiter delayed request");
            }
        }

        let timeout = request.timeout().unwrap_or_else(|| runtime.config.timeout());
        let detailed = runtime.config.observability.detailed_logging;

        let outcome = self
            .attempt_primary(runtime, request, &decision, timeout)
            .await;
        let mut circuit_breaker_open = outcome.circuit_breaker_open;
        let retry_count = outcome.retry_count;
        let mut tried_fallback = false;
        let mut last_error = match outcome.result {
            Some(Ok(response)) => {
                return Ok(Served {
                    response: self.finish(response, retry_count, false),
                    circuit_breaker_open,
                });
            }
            Some(Err(e)) if e.is_cancelled() => {
                return Err(Failed {
                    circuit_breaker_open,
                    retry_count,
                    ..Failed::at(GatewayError::Provider(e), &primary)
                });
            }
            Some(Err(e)) => Some(e),
            None => None,
        };

        for fallback in &decision.fallbacks {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            let Some(provider) = self.resolve(fallback).await else {
                continue;
            };

            if runtime.config.circuit_breaker.enabled {
                let breaker = self.breakers.breaker(&fallback.provider, &fallback.model);
                if !breaker.allow_request() {
                    circuit_breaker_open = true;
                    self.short_circuit(runtime, AttemptRole::Fallback, fallback);
                    continue;
                }
            }

            if detailed {
                tracing::debug!(role = %AttemptRole::Fallback, target = %fallback, "Attempting fallback");
            }
            tried_fallback = true;
            let result = self
                .attempt(runtime, &provider, request, &fallback.model, timeout)
                .await;

            match result {
                Ok(response) => {
                    tracing::info!(from = %primary, to = %fallback, "Fallback model served request");
                    return Ok(Served {
                        response: self.finish(response, retry_count, true),
                        circuit_breaker_open,
                    });
                }
                Err(e) if e.is_cancelled() => {
                    return Err(Failed {
                        circuit_breaker_open,
                        retry_count,
                        fallback_used: true,
                        ..Failed::at(GatewayError::Provider(e), fallback)
                    });
                }
                Err(e) => {
                    if detailed {
                        tracing::debug!(role = %AttemptRole::Fallback, target = %fallback, error = %e, "Fallback failed");
                    }
                    last_error = Some(e);
                }
            }
        }

        if cancel.is_some_and(CancellationToken::is_cancelled)
            && !last_error.as_ref().is_some_and(InvocationError::is_cancelled)
        {
            last_error = Some(InvocationError::cancelled(&primary.provider, &primary.model));
        }

        let (error, target) = match last_error {
            Some(e) => {
                let target = ModelRef::new(&e.provider, &e.model);
                (GatewayError::Provider(e), target)
            }
            None => (
                GatewayError::NoProviderAvailable {
                    model: primary.model.clone(),
                },
                primary.clone(),
            ),
        };

        Err(Failed {
            circuit_breaker_open,
            retry_count,
            fallback_used: tried_fallback,
            ..Failed::at(error, &target)
        })
    }

    /// Breaker-guarded primary call with retries
    async fn attempt_primary(
        &self,
        runtime: &Runtime,
        request: &NormalizedRequest,
        decision: &RoutingDecision,
        timeout: Duration,
    ) -> PrimaryOutcome {
        let primary = decision.primary();
        let mut outcome = PrimaryOutcome {
            result: None,
            circuit_breaker_open: false,
            retry_count: 0,
        };

        let Some(provider) = self.resolve(&primary).await else {
            return outcome;
        };

        let breaker = runtime
            .config
            .circuit_breaker
            .enabled
            .then(|| self.breakers.breaker(&primary.provider, &primary.model));
        let max_retries = runtime.retry.max_retries(request.controls.skip_retries);
        let cancel = request.controls.cancel.as_ref();
        let detailed = runtime.config.observability.detailed_logging;

        let mut attempt = 0u32;
        // Failure that scheduled the pending retry, surfaced if the breaker trips first
        let mut last_error: Option<InvocationError> = None;
        loop {
            if let Some(breaker) = &breaker {
                if !breaker.allow_request() {
                    outcome.circuit_breaker_open = true;
                    self.short_circuit(runtime, AttemptRole::Primary, &primary);
                    outcome.result = last_error.map(Err);
                    return outcome;
                }
            }

            if attempt > 0 {
                outcome.retry_count = attempt;
                if runtime.config.observability.metrics_enabled {
                    self.metrics.record_retry();
                }
            }
            if detailed {
                tracing::debug!(role = %AttemptRole::Primary, target = %primary, attempt, "Attempting primary");
            }
            let result = self
                .attempt(runtime, &provider, request, &primary.model, timeout)
                .await;

            let err = match result {
                Ok(response) => {
                    outcome.result = Some(Ok(response));
                    return outcome;
                }
                Err(e) => e,
            };

            let retryable = !err.is_cancelled() && runtime.retry.is_retryable(&err);
            if !retryable || attempt >= max_retries {
                if detailed {
                    tracing::debug!(role = %AttemptRole::Primary, target = %primary, error = %err, retryable, "Primary failed");
                }
                outcome.result = Some(Err(err));
                return outcome;
            }

            let delay = runtime.retry.delay_for_attempt(attempt);
            tracing::debug!(
                target = %primary,
                attempt = attempt + 1,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying primary model"
            );
            if !sleep_unless_cancelled(delay, cancel).await {
                outcome.result = Some(Err(InvocationError::cancelled(
                    &primary.provider,
                    &primary.model,
                )));
                return outcome;
            }
            last_error = Some(err);
            attempt += 1;
        }
    }

    /// One provider call with timeout, cancellation, breaker and metrics
    async fn attempt(
        &self,
        runtime: &Runtime,
        provider: &Arc<dyn Provider>,
        request: &NormalizedRequest,
        model: &str,
        timeout: Duration,
    ) -> Result<NormalizedResponse, InvocationError> {
        let name = provider.name().to_string();
        let call = provider.invoke_with_timeout(request, model, timeout);

        let result = match request.controls.cancel.as_ref() {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(InvocationError::cancelled(&name, model)),
                r = call => r,
            },
            None => call.await,
        };

        if runtime.config.circuit_breaker.enabled {
            let breaker = self.breakers.breaker(&name, model);
            match &result {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
        }

        if runtime.config.observability.metrics_enabled {
            match &result {
                Ok(response) => {
                    let cost = provider
                        .model_capabilities(model)
                        .map_or(0.0, |caps| compute_cost(&response.usage, &caps).total_cost);
                    self.metrics
                        .record_attempt(&name, model, true, response.usage.total_tokens, cost);
                }
                Err(_) => self.metrics.record_attempt(&name, model, false, 0, 0.0),
            }
        }

        result
    }

    /// Registered, available provider serving `target`
    async fn resolve(&self, target: &ModelRef) -> Option<Arc<dyn Provider>> {
        let Some(provider) = self.deps.registry.provider(&target.provider) else {
            tracing::debug!(target = %target, "Provider not registered, skipping");
            return None;
        };
        if !provider.descriptor().supports(&target.model) {
            tracing::debug!(target = %target, "Model not served by provider, skipping");
            return None;
        }
        if !provider.is_available().await {
            tracing::debug!(target = %target, "Provider unavailable, skipping");
            return None;
        }
        Some(provider)
    }

    fn short_circuit(&self, runtime: &Runtime, role: AttemptRole, target: &ModelRef) {
        tracing::debug!(role = %role, target = %target, "Circuit open, skipping model");
        if runtime.config.observability.metrics_enabled {
            self.metrics.record_short_circuit();
        }
    }

    /// Attach cost and resilience tags to a provider response
    fn finish(&self, mut response: NormalizedResponse, retry_count: u32, fallback_used: bool) -> NormalizedResponse {
        let cost = self
            .deps
            .registry
            .provider(&response.provider)
            .and_then(|p| p.model_capabilities(&response.model))
            .map(|caps| compute_cost(&response.usage, &caps));
        if cost.is_none() {
            tracing::warn!(
                provider = %response.provider,
                model = %response.model,
                "No capabilities for served model, cost unknown"
            );
        }
        response.cost = Some(cost.unwrap_or_default());
        response.retry_count = retry_count;
        response.fallback_used = fallback_used;
        response.cache_hit = false;
        response
    }

    /// Largest cost any model in the chain could incur for this request
    fn worst_case_cost(&self, decision: &RoutingDecision, request: &NormalizedRequest) -> f64 {
        let input_tokens = approximate_tokens(&request.prompt_text()) as u64;

        decision
            .chain()
            .iter()
            .enumerate()
            .filter_map(|(i, target)| {
                if i == 0 {
                    if let Some(caps) = &decision.capabilities {
                        return Some(caps.clone());
                    }
                }
                self.deps
                    .registry
                    .provider(&target.provider)
                    .and_then(|p| p.model_capabilities(&target.model))
            })
            .map(|caps| {
                let output_tokens = request
                    .options
                    .max_tokens
                    .unwrap_or_else(|| caps.max_output_tokens.min(DEFAULT_ESTIMATED_OUTPUT_TOKENS));
                caps.estimate(input_tokens, u64::from(output_tokens)).total_cost
            })
            .fold(0.0, f64::max)
    }
}

/// Sleep for `delay`; false if cancelled first
async fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            () = token.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}
