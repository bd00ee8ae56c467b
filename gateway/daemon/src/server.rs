//! Daemon Server Implementation
//!
//! Hosts one [`Gateway`] for the lifetime of the process:
//! - Initializes providers and loads the active config
//! - Logs a status line on a fixed interval
//! - Optionally serves JSON-line requests from stdin, one reply per line
//! - Reloads the active config when asked (SIGHUP)
//! - Shuts the gateway down gracefully
//!
//! # Request Lines
//!
//! ```text
//! {"prompt": "Summarize this", "task_type": "summarization"}
//! {"messages": [{"role": "user", "content": "hi"}], "provider": "anthropic"}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use gateway_core::resilience::CircuitState;
use gateway_core::{
    BudgetMode, ChatMessage, CostBreakdown, Gateway, NormalizedRequest, NormalizedResponse,
    Provider, TaskType, TokenUsage,
};

/// Configuration for the daemon server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// How often to log gateway status
    pub status_interval: Duration,
    /// How often to check the shutdown and reload flags
    pub poll_interval: Duration,
    /// Serve JSON-line requests from stdin
    pub read_stdin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            read_stdin: false,
        }
    }
}

// ============================================================================
// Request Lines
// ============================================================================

/// One request, as read from stdin or assembled from CLI flags
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RequestSpec {
    /// Single user prompt
    pub prompt: Option<String>,
    /// Full conversation, used instead of `prompt`
    pub messages: Vec<ChatMessage>,
    /// System prompt
    pub system: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Force a provider
    pub provider: Option<String>,
    /// Task type
    pub task_type: Option<TaskType>,
    /// Routing preference
    pub budget_mode: Option<BudgetMode>,
    /// Maximum output tokens
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Calling agent
    pub agent: Option<String>,
    /// Purpose label
    pub purpose: Option<String>,
    /// Read and write the response cache
    pub use_cache: Option<bool>,
    /// Fail fast to fallbacks
    pub skip_retries: bool,
}

impl RequestSpec {
    /// Build the gateway request
    ///
    /// # Errors
    ///
    /// Fails when neither `prompt` nor `messages` is given.
    pub fn into_request(self) -> Result<NormalizedRequest> {
        let mut request = match (self.prompt, self.messages.is_empty()) {
            (Some(prompt), true) => NormalizedRequest::from_prompt(prompt),
            (None, false) => NormalizedRequest::new(self.messages),
            (Some(_), false) => anyhow::bail!("give either 'prompt' or 'messages', not both"),
            (None, true) => anyhow::bail!("request needs a 'prompt' or 'messages'"),
        };

        if let Some(system) = self.system {
            request = request.with_system(system);
        }
        if let Some(model) = self.model {
            request = request.with_model(model);
        }
        if let Some(provider) = self.provider {
            request = request.with_force_provider(provider);
        }
        if let Some(task) = self.task_type {
            request = request.with_task_type(task);
        }
        if let Some(mode) = self.budget_mode {
            request = request.with_budget_mode(mode);
        }
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }
        if let Some(temp) = self.temperature {
            request = request.with_temperature(temp);
        }
        if let Some(ms) = self.timeout_ms {
            request = request.with_timeout(Duration::from_millis(ms));
        }
        if let Some(agent) = self.agent {
            request = request.with_agent(agent);
        }
        if let Some(purpose) = self.purpose {
            request = request.with_purpose(purpose);
        }
        if let Some(use_cache) = self.use_cache {
            request = request.with_cache(use_cache);
        }
        if self.skip_retries {
            request = request.skip_retries();
        }
        Ok(request)
    }
}

/// Reply written for each request line
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    /// The gateway served the request
    Ok {
        /// Correlation id
        request_id: String,
        /// Generated text
        content: String,
        /// Serving provider
        provider: String,
        /// Serving model
        model: String,
        /// Token accounting
        usage: TokenUsage,
        /// Dollar cost
        cost: CostBreakdown,
        /// Provider latency
        latency_ms: u64,
        /// Served from cache
        cache_hit: bool,
        /// Served by a fallback model
        fallback_used: bool,
    },
    /// The request failed
    Error {
        /// Correlation id, when the line parsed
        request_id: Option<String>,
        /// Stable error name
        error: String,
        /// Human-readable message
        message: String,
    },
}

impl Reply {
    /// Reply for a served request
    pub fn served(request_id: String, response: NormalizedResponse) -> Self {
        Self::Ok {
            request_id,
            cost: response.cost.unwrap_or_default(),
            content: response.content,
            provider: response.provider,
            model: response.model,
            usage: response.usage,
            latency_ms: response.latency_ms,
            cache_hit: response.cache_hit,
            fallback_used: response.fallback_used,
        }
    }

    fn rejected(request_id: Option<String>, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            request_id,
            error: error.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// The daemon server
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    config: ServerConfig,
}

impl GatewayServer {
    /// Create a server around `gateway`
    pub fn new(gateway: Arc<Gateway>, config: ServerConfig) -> Self {
        Self { gateway, config }
    }

    /// Run until `shutdown` is set
    ///
    /// `reload_config` is cleared each time the active config is re-read.
    pub async fn run(
        &self,
        providers: Vec<Arc<dyn Provider>>,
        shutdown: Arc<AtomicBool>,
        reload_config: Arc<AtomicBool>,
    ) -> Result<()> {
        let source = self.gateway.on_init(providers).await;
        let available = self.gateway.available_providers().await;
        if available.is_empty() {
            warn!("No provider is available; requests will fail until one comes up");
        }
        info!(config_source = %source, providers = ?available, "Gateway ready");

        let mut status = tokio::time::interval(self.config.status_interval);
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately
        status.tick().await;

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut input = self
            .config
            .read_stdin
            .then(|| BufReader::new(tokio::io::stdin()).lines());
        let mut stdout = tokio::io::stdout();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping");
                break;
            }

            if reload_config.swap(false, Ordering::SeqCst) {
                let source = self.gateway.reload_config().await;
                info!(config_source = %source, "Gateway config reloaded");
            }

            tokio::select! {
                _ = status.tick() => self.log_status(),
                line = next_line(&mut input) => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let reply = self.handle_line(&line).await;
                        let mut out = serde_json::to_string(&reply).context("Failed to encode reply")?;
                        out.push('\n');
                        stdout.write_all(out.as_bytes()).await.context("Failed to write reply")?;
                        stdout.flush().await?;
                    }
                    Ok(None) => {
                        info!("Request input closed");
                        input = None;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read request input, no longer reading");
                        input = None;
                    }
                },
                _ = poll.tick() => {}
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Serve one JSON request line
    pub async fn handle_line(&self, line: &str) -> Reply {
        let spec: RequestSpec = match serde_json::from_str(line) {
            Ok(spec) => spec,
            Err(e) => return Reply::rejected(None, "InvalidRequestError", format!("bad request line: {e}")),
        };
        let request = match spec.into_request() {
            Ok(request) => request,
            Err(e) => return Reply::rejected(None, "InvalidRequestError", e.to_string()),
        };

        let request_id = request.metadata.request_id.clone();
        debug!(request_id = %request_id, "Serving request line");
        match self.gateway.invoke(&request).await {
            Ok(response) => Reply::served(request_id, response),
            Err(e) => Reply::rejected(Some(request_id), e.name(), e.to_string()),
        }
    }

    fn log_status(&self) {
        let metrics = self.gateway.metrics();
        let open_circuits: Vec<String> = self
            .gateway
            .circuit_snapshots()
            .into_iter()
            .filter(|s| s.state != CircuitState::Closed)
            .map(|s| s.key)
            .collect();
        let limiter = self.gateway.rate_limit_metrics();

        info!(
            invocations = metrics.invocations,
            successes = metrics.successes,
            failures = metrics.failures,
            cache_hits = metrics.cache_hits,
            fallbacks = metrics.fallbacks,
            p50_ms = metrics.latency_p50_ms,
            p99_ms = metrics.latency_p99_ms,
            tokens_available = limiter.available_tokens,
            open_circuits = ?open_circuits,
            "Gateway status"
        );
    }

    async fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        self.gateway.on_shutdown().await;
        info!("Shutdown complete");
    }
}

/// Next stdin line, or pending forever once input is gone
async fn next_line(input: &mut Option<Lines<BufReader<Stdin>>>) -> std::io::Result<Option<String>> {
    match input {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{GatewayDeps, MessageRole, ProviderRegistry};
    use pretty_assertions::assert_eq;

    fn empty_gateway() -> Arc<Gateway> {
        Arc::new(Gateway::new(GatewayDeps::new(Arc::new(ProviderRegistry::new()))))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.status_interval, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(!config.read_stdin);
    }

    #[test]
    fn test_request_spec_from_line() {
        let spec: RequestSpec = serde_json::from_str(
            r#"{"prompt": "hi", "system": "be brief", "task_type": "code_generation",
                "budget_mode": "economy", "max_tokens": 64, "use_cache": false}"#,
        )
        .unwrap();
        let request = spec.into_request().unwrap();

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.metadata.task_type, Some(TaskType::CodeGeneration));
        assert_eq!(request.controls.budget_mode, Some(BudgetMode::Economy));
        assert_eq!(request.options.max_tokens, Some(64));
        assert!(!request.controls.use_cache);
    }

    #[test]
    fn test_request_spec_needs_exactly_one_input() {
        assert!(RequestSpec::default().into_request().is_err());

        let both = RequestSpec {
            prompt: Some("hi".into()),
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        };
        assert!(both.into_request().is_err());
    }

    #[tokio::test]
    async fn test_handle_line_rejects_garbage() {
        let server = GatewayServer::new(empty_gateway(), ServerConfig::default());
        match server.handle_line("{nope").await {
            Reply::Error { error, request_id, .. } => {
                assert_eq!(error, "InvalidRequestError");
                assert!(request_id.is_none());
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_line_without_providers() {
        let server = GatewayServer::new(empty_gateway(), ServerConfig::default());
        match server.handle_line(r#"{"prompt": "hi"}"#).await {
            Reply::Error { error, request_id, .. } => {
                assert_eq!(error, "NoProviderAvailableError");
                assert!(request_id.is_some());
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_flag() {
        let server = GatewayServer::new(empty_gateway(), ServerConfig::default());
        let shutdown = Arc::new(AtomicBool::new(true));
        let reload = Arc::new(AtomicBool::new(false));

        server.run(vec![], shutdown, reload).await.unwrap();
    }

    #[test]
    fn test_reply_serialization() {
        let reply = Reply::rejected(Some("req-1".into()), "BudgetExceededError", "over");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "BudgetExceededError");
    }
}
