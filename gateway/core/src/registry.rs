//! Provider Registry
//!
//! Owns the set of live providers in registration order and the background
//! task that keeps their availability fresh.
//!
//! # Lifecycle
//!
//! ```text
//! ProviderFactory::from_credentials ──► initialize() ──► HealthCheckTask
//!                                            │                  │
//!                                    failed providers      every interval:
//!                                      are dropped         is_available()
//!                                                                │
//!                                   shutdown() ◄── cancel token ─┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::InvocationError;
use crate::provider::{
    AnthropicProvider, ModelCapabilities, OllamaProvider, OpenAiProvider, Provider,
    ProviderCredentials, ProviderHealthStatus,
};

/// Default interval between background availability probes
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Default provider preference: local first
pub const DEFAULT_PROVIDER_PREFERENCE: [&str; 3] = ["ollama", "openai", "anthropic"];

type ProviderList = Arc<RwLock<Vec<Arc<dyn Provider>>>>;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A provider with this name is already registered
    #[error("provider '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No provider with this name is registered
    #[error("provider '{0}' is not registered")]
    NotRegistered(String),

    /// Provider setup failed
    #[error("provider '{provider}' failed to initialize: {source}")]
    Initialization {
        /// Provider name
        provider: String,
        /// Underlying failure
        #[source]
        source: InvocationError,
    },
}

/// One model offered by one registered provider
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AvailableModel {
    /// Provider name
    pub provider: String,
    /// Model id
    pub model: String,
    /// Static capabilities
    pub capabilities: ModelCapabilities,
}

/// Status row for one provider
#[derive(Clone, Debug, Serialize)]
pub struct ProviderStatus {
    /// Provider name
    pub name: String,
    /// Human-readable name
    pub display_name: String,
    /// Result of the (cached) availability probe
    pub available: bool,
    /// Health bookkeeping
    pub health: ProviderHealthStatus,
    /// Models this provider serves
    pub supported_models: Vec<String>,
    /// Model used when a request names none
    pub default_model: String,
}

// ============================================================================
// Provider Factory
// ============================================================================

/// Builds providers from whatever credentials are present
pub struct ProviderFactory;

impl ProviderFactory {
    /// One provider per present credential, in default preference order
    pub fn from_credentials(credentials: &ProviderCredentials) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        match &credentials.ollama_base_url {
            Some(url) => match OllamaProvider::new(url.clone()) {
                Ok(p) => providers.push(Arc::new(p)),
                Err(e) => tracing::warn!(error = %e, "Skipping Ollama provider"),
            },
            None => tracing::debug!("OLLAMA_BASE_URL/OLLAMA_HOST not set, Ollama disabled"),
        }

        match &credentials.openai_api_key {
            Some(key) => {
                let built = match &credentials.openai_base_url {
                    Some(url) => OpenAiProvider::with_base_url(key.clone(), url.clone()),
                    None => OpenAiProvider::new(key.clone()),
                };
                match built {
                    Ok(p) => providers.push(Arc::new(p)),
                    Err(e) => tracing::warn!(error = %e, "Skipping OpenAI provider"),
                }
            }
            None => tracing::debug!("OPENAI_API_KEY not set, OpenAI disabled"),
        }

        match &credentials.anthropic_api_key {
            Some(key) => match AnthropicProvider::new(key.clone()) {
                Ok(p) => providers.push(Arc::new(p)),
                Err(e) => tracing::warn!(error = %e, "Skipping Anthropic provider"),
            },
            None => tracing::debug!("ANTHROPIC_API_KEY not set, Anthropic disabled"),
        }

        providers
    }
}

// ============================================================================
// Health Check Task
// ============================================================================

/// Background loop probing every provider on a fixed interval
struct HealthCheckTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthCheckTask {
    fn spawn(providers: ProviderList, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately; initialize() already probed
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => check_all(&providers).await,
                }
            }
            tracing::debug!("Health check task stopped");
        });

        Self { cancel, handle }
    }

    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Health check task ended abnormally");
        }
    }
}

async fn check_all(providers: &ProviderList) {
    let snapshot: Vec<Arc<dyn Provider>> = providers.read().clone();

    for provider in snapshot {
        let was_available = provider.health_status().available;
        provider.health().invalidate_probe();
        let available = provider.is_available().await;

        if available != was_available {
            if available {
                tracing::info!(provider = %provider.name(), "Provider became available");
            } else {
                tracing::warn!(provider = %provider.name(), "Provider became unavailable");
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of live providers
///
/// Reads never await while holding the lock; callers get cloned `Arc`s.
pub struct ProviderRegistry {
    providers: ProviderList,
    initialized: AtomicBool,
    health_task: Mutex<Option<HealthCheckTask>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Empty, uninitialized registry
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(Vec::new())),
            initialized: AtomicBool::new(false),
            health_task: Mutex::new(None),
        }
    }

    /// Registry holding `providers` without initializing them
    ///
    /// Useful for read-only capability queries that must not touch the
    /// network. Duplicate names after the first are ignored.
    pub fn from_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        let registry = Self::new();
        {
            let mut registered = registry.providers.write();
            for provider in providers {
                if !registered.iter().any(|p| p.name() == provider.name()) {
                    registered.push(provider);
                }
            }
        }
        registry
    }

    /// Initialize `providers` and start the health check loop
    ///
    /// Providers whose `initialize()` fails are logged and dropped. Calling
    /// this on an initialized registry does nothing.
    pub async fn initialize(&self, providers: Vec<Arc<dyn Provider>>, interval: Duration) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("Provider registry already initialized");
            return;
        }

        let results = join_all(providers.iter().map(|p| p.initialize())).await;

        let mut live = Vec::with_capacity(providers.len());
        for (provider, result) in providers.into_iter().zip(results) {
            match result {
                Ok(()) => live.push(provider),
                Err(e) => {
                    tracing::warn!(provider = %provider.name(), error = %e, "Provider failed to initialize, dropping");
                }
            }
        }

        {
            let mut registered = self.providers.write();
            for provider in live {
                if registered.iter().any(|p| p.name() == provider.name()) {
                    tracing::warn!(provider = %provider.name(), "Duplicate provider ignored");
                    continue;
                }
                registered.push(provider);
            }
        }

        let task = HealthCheckTask::spawn(Arc::clone(&self.providers), interval);
        if let Some(previous) = self.health_task.lock().replace(task) {
            previous.cancel.cancel();
        }

        tracing::info!(
            providers = ?self.names(),
            interval_secs = interval.as_secs(),
            "Provider registry initialized"
        );
    }

    /// Stop the health loop, shut every provider down and clear the registry
    ///
    /// Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let task = self.health_task.lock().take();
        let providers = std::mem::take(&mut *self.providers.write());
        let was_initialized = self.initialized.swap(false, Ordering::SeqCst);

        if task.is_none() && providers.is_empty() && !was_initialized {
            return;
        }

        if let Some(task) = task {
            task.stop().await;
        }
        join_all(providers.iter().map(|p| p.shutdown())).await;

        tracing::info!(count = providers.len(), "Provider registry shut down");
    }

    /// Whether `initialize` has run and `shutdown` has not
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initialize and add one provider
    pub async fn register_provider(&self, provider: Arc<dyn Provider>) -> Result<(), RegistryError> {
        let name = provider.name().to_string();
        if self.provider(&name).is_some() {
            return Err(RegistryError::AlreadyRegistered(name));
        }

        provider
            .initialize()
            .await
            .map_err(|source| RegistryError::Initialization {
                provider: name.clone(),
                source,
            })?;

        let inserted = {
            let mut registered = self.providers.write();
            let duplicate = registered.iter().any(|p| p.name() == name);
            if !duplicate {
                registered.push(Arc::clone(&provider));
            }
            !duplicate
        };

        // Lost a concurrent registration: undo the initialize above
        if !inserted {
            provider.shutdown().await;
            return Err(RegistryError::AlreadyRegistered(name));
        }
        tracing::info!(provider = %name, "Provider registered");
        Ok(())
    }

    /// Remove and shut down one provider
    pub async fn unregister_provider(&self, name: &str) -> Result<(), RegistryError> {
        let removed = {
            let mut registered = self.providers.write();
            let idx = registered
                .iter()
                .position(|p| p.name() == name)
                .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
            registered.remove(idx)
        };

        removed.shutdown().await;
        tracing::info!(provider = %name, "Provider unregistered");
        Ok(())
    }

    /// Provider by name
    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().iter().find(|p| p.name() == name).cloned()
    }

    /// All providers in registration order
    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.read().clone()
    }

    /// Registered provider names
    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Cached availability of a provider; unknown names are unavailable
    pub async fn is_provider_available(&self, name: &str) -> bool {
        match self.provider(name) {
            Some(provider) => provider.is_available().await,
            None => false,
        }
    }

    /// First registered provider serving `model`
    pub fn provider_for_model(&self, model: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .read()
            .iter()
            .find(|p| p.descriptor().supports(model))
            .cloned()
    }

    /// Capabilities of `model` from the first provider serving it
    pub fn model_capabilities(&self, model: &str) -> Option<ModelCapabilities> {
        self.provider_for_model(model)
            .and_then(|p| p.model_capabilities(model))
    }

    /// Every model of every registered provider
    pub fn all_available_models(&self) -> Vec<AvailableModel> {
        self.providers
            .read()
            .iter()
            .flat_map(|p| {
                let provider = p.name().to_string();
                p.descriptor()
                    .models()
                    .into_iter()
                    .map(move |(model, capabilities)| AvailableModel {
                        provider: provider.clone(),
                        model,
                        capabilities,
                    })
            })
            .collect()
    }

    /// Status row per provider
    pub async fn provider_statuses(&self) -> Vec<ProviderStatus> {
        let mut statuses = Vec::new();
        for provider in self.providers() {
            let available = provider.is_available().await;
            let descriptor = provider.descriptor();
            statuses.push(ProviderStatus {
                name: descriptor.name().to_string(),
                display_name: descriptor.display_name().to_string(),
                available,
                health: provider.health_status(),
                supported_models: descriptor.supported_models(),
                default_model: descriptor.default_model().to_string(),
            });
        }
        statuses
    }

    /// First available provider in `preference` order
    pub async fn best_available_provider<S: AsRef<str>>(
        &self,
        preference: &[S],
    ) -> Option<Arc<dyn Provider>> {
        for name in preference {
            if let Some(provider) = self.provider(name.as_ref()) {
                if provider.is_available().await {
                    return Some(provider);
                }
            }
        }
        None
    }
}
