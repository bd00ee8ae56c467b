//! Shared test infrastructure: a scripted provider and a gateway harness

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use gateway_core::{
    EffectiveConfig, FinishReason, Gateway, GatewayDeps, InMemoryCache, InMemoryUsageStore,
    InvocationError, InvocationErrorKind, ManualClock, ModelCapabilities, ModelRef,
    NormalizedRequest, NormalizedResponse, Provider, ProviderDescriptor, ProviderHealth,
    ProviderRegistry, TokenUsage,
};

// =============================================================================
// Scripted Provider
// =============================================================================

/// What the next call to a scripted provider does
#[derive(Clone, Debug)]
pub enum Step {
    /// Answer with content and token usage
    Reply(&'static str, u32, u32),
    /// Fail with this error kind
    Fail(InvocationErrorKind),
    /// Never answer
    Hang,
}

/// Provider whose answers are queued up front
///
/// Once the script runs out every call replies `"ok"` with 100 in / 50 out.
#[derive(Debug)]
pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    health: ProviderHealth,
    script: Mutex<VecDeque<Step>>,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &str, models: Vec<(&str, ModelCapabilities)>) -> Self {
        let default_model = models.first().map(|(m, _)| (*m).to_string()).unwrap_or_default();
        Self {
            descriptor: ProviderDescriptor::new(
                name,
                name.to_uppercase(),
                default_model,
                models.into_iter().map(|(m, c)| (m.to_string(), c)),
            ),
            health: ProviderHealth::new(),
            script: Mutex::new(VecDeque::new()),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    pub fn push_n(&self, step: Step, n: usize) {
        for _ in 0..n {
            self.push(step.clone());
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn health(&self) -> &ProviderHealth {
        &self.health
    }

    fn availability_ttl(&self) -> Duration {
        Duration::ZERO
    }

    async fn send(
        &self,
        _request: &NormalizedRequest,
        model: &str,
    ) -> Result<NormalizedResponse, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(Step::Reply("ok", 100, 50));

        match step {
            Step::Reply(content, input, output) => Ok(NormalizedResponse {
                content: content.to_string(),
                usage: TokenUsage::new(input, output),
                model: model.to_string(),
                provider: self.name().to_string(),
                finish_reason: FinishReason::Stop,
                ..Default::default()
            }),
            Step::Fail(kind) => Err(InvocationError::new(
                self.name(),
                model,
                kind.clone(),
                format!("scripted failure: {}", kind.label()),
            )),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(InvocationError::new(
                    self.name(),
                    model,
                    InvocationErrorKind::Timeout,
                    "hung",
                ))
            }
        }
    }

    async fn probe(&self) -> Result<(), InvocationError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(InvocationError::new(
                self.name(),
                "",
                InvocationErrorKind::Network {
                    code: "ECONNREFUSED".into(),
                },
                "connection refused",
            ))
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

/// 0.00000005 per input token, 0.0000004 per output token
pub fn cheap_caps() -> ModelCapabilities {
    ModelCapabilities {
        context_window: 128_000,
        max_output_tokens: 4096,
        supports_vision: false,
        supports_function_calling: true,
        supports_streaming: true,
        supports_reasoning_effort: false,
        cost_per_input_token: 0.000_000_05,
        cost_per_output_token: 0.000_000_4,
        quality_tier: 2,
    }
}

/// Ten times the price of [`cheap_caps`]
pub fn pricey_caps() -> ModelCapabilities {
    ModelCapabilities {
        cost_per_input_token: 0.000_000_5,
        cost_per_output_token: 0.000_004,
        quality_tier: 4,
        ..cheap_caps()
    }
}

/// Primary `alpha/alpha-small`, fallback `beta/beta-large`, fast retries,
/// rate limit and cache off
pub fn test_config() -> EffectiveConfig {
    let mut config = EffectiveConfig::default();
    config.primary_model = ModelRef::new("alpha", "alpha-small");
    config.fallback_models = vec![ModelRef::new("beta", "beta-large")];
    config.retry.initial_delay_ms = 5;
    config.retry.max_delay_ms = 20;
    config.rate_limit.enabled = false;
    config.cache.enabled = false;
    config
}

pub struct Harness {
    pub gateway: Gateway,
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<InMemoryUsageStore>,
    pub cache: Arc<InMemoryCache>,
    pub clock: Arc<ManualClock>,
    pub alpha: Arc<ScriptedProvider>,
    pub beta: Arc<ScriptedProvider>,
}

impl Harness {
    pub fn new(config: EffectiveConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap(),
        ));
        let alpha = Arc::new(ScriptedProvider::new("alpha", vec![("alpha-small", cheap_caps())]));
        let beta = Arc::new(ScriptedProvider::new("beta", vec![("beta-large", pricey_caps())]));

        let registry = Arc::new(ProviderRegistry::from_providers(vec![
            alpha.clone() as Arc<dyn Provider>,
            beta.clone() as Arc<dyn Provider>,
        ]));
        let store = Arc::new(InMemoryUsageStore::new());
        let cache = InMemoryCache::shared(clock.clone());

        let deps = GatewayDeps::new(registry.clone())
            .with_persistence(store.clone())
            .with_cache(cache.clone())
            .with_clock(clock.clone());

        Self {
            gateway: Gateway::with_config(deps, config),
            registry,
            store,
            cache,
            clock,
            alpha,
            beta,
        }
    }

    pub fn records(&self) -> usize {
        self.store.records().len()
    }
}
