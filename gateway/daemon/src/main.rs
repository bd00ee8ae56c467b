//! Gateway Daemon - Multi-Provider LLM Gateway
//!
//! Runs the resilient gateway as a long-lived process, or drives it for a
//! single call from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Long-running daemon, JSON-line requests on stdin
//! gateway-daemon serve --stdin
//!
//! # Provider health, spend and breaker state
//! gateway-daemon status
//!
//! # One-off request
//! gateway-daemon invoke "Summarize this paragraph" --task summarization
//!
//! # Pre-flight cost
//! gateway-daemon estimate --task analysis --input-tokens 2000 --output-tokens 500
//!
//! # Persist the effective config as the active config
//! gateway-daemon config --activate
//! ```
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY`, `OPENAI_BASE_URL`: OpenAI provider
//! - `ANTHROPIC_API_KEY`: Anthropic provider
//! - `OLLAMA_BASE_URL` or `OLLAMA_HOST`/`OLLAMA_PORT`: local Ollama provider
//! - `GATEWAY_CONFIG`: config file (default `$XDG_CONFIG_HOME/llm-gateway/gateway.toml`)
//! - `GATEWAY_DATA_DIR`: usage log directory (default `$XDG_DATA_HOME/llm-gateway`)
//! - `GATEWAY_PRIMARY_MODEL`, `GATEWAY_TIMEOUT_MS`, `GATEWAY_DAILY_LIMIT`,
//!   `GATEWAY_MONTHLY_LIMIT`, `GATEWAY_LOG_LEVEL`, `GATEWAY_CACHE_ENABLED`
//! - `RUST_LOG`: overrides the configured log level
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//! - `SIGHUP`: Reload the active config

mod server;
mod store;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use gateway_core::resilience::budget::{day_start, month_start};
use gateway_core::{
    default_config_path, load_config_from_path, BudgetMode, ConfigOverrides, ConfigSource, Gateway,
    GatewayDeps,
    InMemoryCache, LoadedConfig, ModelRef, PersistencePort, Provider, ProviderCredentials,
    ProviderFactory, ProviderRegistry, SystemClock, TaskType,
};

use server::{GatewayServer, Reply, RequestSpec, ServerConfig};
use store::JsonlUsageStore;

/// Gateway Daemon - resilient multi-provider LLM gateway
#[derive(Parser, Debug)]
#[command(name = "gateway-daemon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory for the usage log and active config
    #[arg(short = 'd', long, env = "GATEWAY_DATA_DIR", value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Primary model as provider/model
    #[arg(long, value_name = "PROVIDER/MODEL", global = true)]
    primary_model: Option<ModelRef>,

    /// Provider call timeout in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    timeout_ms: Option<u64>,

    /// Disable the response cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Disable rate limiting
    #[arg(long, global = true)]
    no_rate_limit: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway until interrupted
    Serve {
        /// Serve JSON-line requests from stdin
        #[arg(long)]
        stdin: bool,

        /// Seconds between status log lines
        #[arg(long, default_value_t = 60, value_name = "SECS")]
        status_interval: u64,
    },

    /// Show providers, spend and circuit breakers
    Status,

    /// Send one request through the gateway
    Invoke(InvokeArgs),

    /// Estimate the cost of a task
    Estimate {
        /// Task type
        #[arg(short, long, default_value = "general")]
        task: TaskType,

        /// Prompt tokens
        #[arg(long, default_value_t = 1000)]
        input_tokens: u64,

        /// Completion tokens
        #[arg(long, default_value_t = 500)]
        output_tokens: u64,

        /// Routing preference (economy, quality)
        #[arg(long)]
        budget_mode: Option<BudgetMode>,
    },

    /// Print the effective configuration
    Config {
        /// Save it as the active config
        #[arg(long, conflicts_with = "clear")]
        activate: bool,

        /// Remove the active config
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Args, Debug)]
struct InvokeArgs {
    /// User prompt
    prompt: String,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Task type
    #[arg(short, long)]
    task: Option<TaskType>,

    /// Model override
    #[arg(short, long)]
    model: Option<String>,

    /// Force a provider
    #[arg(short, long)]
    provider: Option<String>,

    /// Routing preference (economy, quality)
    #[arg(long)]
    budget_mode: Option<BudgetMode>,

    /// Maximum output tokens
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Print the full reply as JSON
    #[arg(long)]
    json: bool,
}

impl From<InvokeArgs> for RequestSpec {
    fn from(args: InvokeArgs) -> Self {
        Self {
            prompt: Some(args.prompt),
            system: args.system,
            model: args.model,
            provider: args.provider,
            task_type: args.task,
            budget_mode: args.budget_mode,
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            agent: Some("gateway-cli".into()),
            ..Default::default()
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gateway_daemon={level},gateway_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// File, environment, then command-line flags
fn resolve_config(cli: &Cli) -> Result<LoadedConfig> {
    let path = cli.config.clone().or_else(default_config_path);
    let mut loaded = load_config_from_path(path, |key| std::env::var(key).ok())
        .context("Failed to load gateway configuration")?;

    let overrides = ConfigOverrides {
        primary_model: cli.primary_model.clone(),
        timeout_ms: cli.timeout_ms,
        disable_cache: cli.no_cache,
        disable_rate_limit: cli.no_rate_limit,
        log_level: cli.log_level.clone(),
    };
    overrides.apply(&mut loaded);
    loaded
        .config
        .validate()
        .context("Invalid configuration after command-line overrides")?;
    Ok(loaded)
}

fn open_store(cli: &Cli) -> Result<Arc<JsonlUsageStore>> {
    let dir = cli
        .data_dir
        .clone()
        .or_else(JsonlUsageStore::default_dir)
        .context("No data directory; pass --data-dir")?;
    Ok(Arc::new(JsonlUsageStore::new(dir)))
}

fn build_gateway(loaded: &LoadedConfig, store: Arc<JsonlUsageStore>) -> Arc<Gateway> {
    let clock = SystemClock::shared();
    let deps = GatewayDeps::new(Arc::new(ProviderRegistry::new()))
        .with_persistence(store)
        .with_cache(InMemoryCache::shared(Arc::clone(&clock)))
        .with_clock(clock);
    Arc::new(Gateway::with_config(deps, loaded.config.clone()))
}

fn providers_from_env() -> Vec<Arc<dyn Provider>> {
    ProviderFactory::from_credentials(&ProviderCredentials::from_env())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = resolve_config(&cli)?;
    init_logging(&loaded.config.observability.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_source = %loaded.source,
        config_path = ?loaded.path,
        "Gateway daemon starting"
    );

    let store = open_store(&cli)?;
    let result = match cli.command {
        Command::Serve {
            stdin,
            status_interval,
        } => {
            let config = ServerConfig {
                status_interval: Duration::from_secs(status_interval.max(1)),
                read_stdin: stdin,
                ..ServerConfig::default()
            };
            serve(&loaded, store, config).await
        }
        Command::Status => status(&loaded, store).await,
        Command::Invoke(args) => invoke(&loaded, store, args).await,
        Command::Estimate {
            task,
            input_tokens,
            output_tokens,
            budget_mode,
        } => estimate(&loaded, store, task, input_tokens, output_tokens, budget_mode),
        Command::Config { activate, clear } => show_config(&loaded, &store, activate, clear).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Gateway daemon stopped with error");
    }
    result
}

async fn serve(loaded: &LoadedConfig, store: Arc<JsonlUsageStore>, config: ServerConfig) -> Result<()> {
    info!(data_dir = %store.dir().display(), "Usage log directory");
    let gateway = build_gateway(loaded, store);

    let shutdown = Arc::new(AtomicBool::new(false));
    let reload_config = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(Arc::clone(&shutdown), Arc::clone(&reload_config))?;

    let server = GatewayServer::new(gateway, config);
    server.run(providers_from_env(), shutdown, reload_config).await?;

    info!("Gateway daemon stopped cleanly");
    Ok(())
}

#[cfg(unix)]
fn spawn_signal_handler(shutdown: Arc<AtomicBool>, reload_config: Arc<AtomicBool>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating shutdown");
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, marking config for reload");
                    reload_config.store(true, Ordering::SeqCst);
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handler(shutdown: Arc<AtomicBool>, _reload_config: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating shutdown");
        }
        shutdown.store(true, Ordering::SeqCst);
    });
    Ok(())
}

async fn status(loaded: &LoadedConfig, store: Arc<JsonlUsageStore>) -> Result<()> {
    let gateway = build_gateway(loaded, Arc::clone(&store));
    let source = gateway.on_init(providers_from_env()).await;

    let now = chrono::Utc::now();
    let daily = store.sum_successful_cost(day_start(now)).await.ok();
    let monthly = store.sum_successful_cost(month_start(now)).await.ok();
    let config = gateway.current_config();

    let report = serde_json::json!({
        "config_source": source.to_string(),
        "primary_model": config.primary_model,
        "fallback_models": config.fallback_models,
        "providers": gateway.provider_statuses().await,
        "spend": {
            "daily": daily,
            "daily_limit": config.budget.daily_limit,
            "monthly": monthly,
            "monthly_limit": config.budget.monthly_limit,
        },
        "circuits": gateway.circuit_snapshots(),
    });
    gateway.on_shutdown().await;
    print_json(&report)
}

async fn invoke(loaded: &LoadedConfig, store: Arc<JsonlUsageStore>, args: InvokeArgs) -> Result<()> {
    let as_json = args.json;
    let request = RequestSpec::from(args).into_request()?;

    let gateway = build_gateway(loaded, store);
    gateway.on_init(providers_from_env()).await;
    let request_id = request.metadata.request_id.clone();
    let outcome = gateway.invoke(&request).await;
    gateway.on_shutdown().await;

    match outcome {
        Ok(response) if !as_json => {
            println!("{}", response.content);
            eprintln!(
                "[{}/{} | {} in / {} out | ${:.6}{}]",
                response.provider,
                response.model,
                response.usage.input_tokens,
                response.usage.output_tokens,
                response.cost.unwrap_or_default().total_cost,
                if response.fallback_used { " | fallback" } else { "" },
            );
            Ok(())
        }
        Ok(response) => print_json(&Reply::served(request_id, response)),
        Err(e) => Err(anyhow::anyhow!("{}: {e}", e.name())),
    }
}

fn estimate(
    loaded: &LoadedConfig,
    store: Arc<JsonlUsageStore>,
    task: TaskType,
    input_tokens: u64,
    output_tokens: u64,
    budget_mode: Option<BudgetMode>,
) -> Result<()> {
    let providers = providers_from_env();
    if providers.is_empty() {
        anyhow::bail!("No provider credentials set; export OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_HOST");
    }

    // Catalog lookups only, providers are not started
    let clock = SystemClock::shared();
    let deps = GatewayDeps::new(Arc::new(ProviderRegistry::from_providers(providers)))
        .with_persistence(store)
        .with_clock(clock);
    let gateway = Gateway::with_config(deps, loaded.config.clone());

    let estimate = gateway
        .estimate_task_cost(task, input_tokens, output_tokens, budget_mode)
        .context("No model can serve this task")?;
    let recommended: Vec<String> = gateway
        .recommended_models(task, budget_mode)
        .into_iter()
        .map(|m| format!("{}/{}", m.provider, m.model))
        .collect();

    print_json(&serde_json::json!({
        "task": task,
        "input_tokens": input_tokens,
        "output_tokens": output_tokens,
        "estimate": estimate,
        "recommended": recommended,
    }))
}

async fn show_config(
    loaded: &LoadedConfig,
    store: &JsonlUsageStore,
    activate: bool,
    clear: bool,
) -> Result<()> {
    if clear {
        let removed = store.clear_active_config().await?;
        info!(removed, "Cleared active config");
    }

    let active = store.load_active_config().await?;
    let (config, source) = match (&active, activate) {
        (Some(active), false) => (active.clone(), ConfigSource::Persisted),
        _ => (loaded.config.clone(), loaded.source),
    };

    if activate {
        store.save_active_config(&config).await?;
        info!(path = %store.dir().display(), "Saved active config");
    }

    println!("# source: {source}");
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
