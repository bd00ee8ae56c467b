//! Gateway Configuration
//!
//! [`EffectiveConfig`] is the single configuration object the gateway runs
//! with. At runtime it is loaded from the persistence port's active config
//! row; standalone deployments load it from a TOML file at
//! `~/.config/llm-gateway/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`GATEWAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! primary_model = "openai/gpt-5-mini"
//! fallback_models = ["anthropic/claude-haiku-4-5", "ollama/llama3.2"]
//! timeout_ms = 60000
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! timeout_ms = 60000
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 1000
//! backoff_multiplier = 2.0
//!
//! [budget]
//! daily_limit = 50.0
//! monthly_limit = 1000.0
//! hard_stop = true
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ModelRef;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Active config row from the persistence port
    Persisted,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Persisted => write!(f, "persisted config"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Sub-configurations
// =============================================================================

/// Circuit breaker settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether breakers guard primary calls
    pub enabled: bool,
    /// Failures inside the monitoring window that open the breaker
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// How long the breaker stays open before a trial call
    pub timeout_ms: u64,
    /// Rolling window failures are counted in
    pub monitoring_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            monitoring_window_ms: 120_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Open duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Failure counting window
    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}

/// Retry settings for the primary model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Whether retryable failures are retried
    pub enabled: bool,
    /// Retries after the first attempt (0-10)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Growth factor between retries (> 1)
    pub backoff_multiplier: f64,
    /// HTTP statuses worth retrying
    pub retryable_status_codes: Vec<u16>,
    /// Network error codes worth retrying
    pub retryable_errors: Vec<String>,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_errors: vec![
                "ECONNRESET".to_string(),
                "ETIMEDOUT".to_string(),
                "ECONNREFUSED".to_string(),
                "timeout".to_string(),
                "network".to_string(),
            ],
            jitter: false,
        }
    }
}

/// Token bucket settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether requests are rate limited
    pub enabled: bool,
    /// Sustained refill rate
    pub requests_per_minute: u32,
    /// Bucket capacity
    pub burst_size: u32,
    /// Wait for a token instead of failing immediately
    pub queue_enabled: bool,
    /// Maximum number of waiting requests
    pub max_queue_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            burst_size: 10,
            queue_enabled: true,
            max_queue_size: 100,
        }
    }
}

/// Response cache settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether responses are cached
    pub enabled: bool,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Prefix prepended to every fingerprint
    pub key_prefix: String,
    /// Regexes matched against purpose and agent name; matches skip the cache
    pub exclude_patterns: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            key_prefix: "llm:cache:".to_string(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Spend limits in USD
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Whether limits are checked
    pub enabled: bool,
    /// Limit per UTC day
    pub daily_limit: f64,
    /// Limit per UTC calendar month
    pub monthly_limit: f64,
    /// Percentage of a limit that triggers a warning
    pub alert_threshold: f64,
    /// Reject over-budget requests; when false only warn
    pub hard_stop: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: 50.0,
            monthly_limit: 1000.0,
            alert_threshold: 80.0,
            hard_stop: true,
        }
    }
}

/// Logging, tracing and metrics switches
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Record gateway metrics
    pub metrics_enabled: bool,
    /// Emit per-attempt debug events
    pub detailed_logging: bool,
    /// Wrap each invocation in a tracing span
    pub tracing_enabled: bool,
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            detailed_logging: false,
            tracing_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// The configuration a gateway instance runs with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectiveConfig {
    /// Model used in legacy (fixed-model) mode
    pub primary_model: ModelRef,
    /// Ordered fallbacks used in legacy mode
    pub fallback_models: Vec<ModelRef>,
    /// Default provider call timeout
    pub timeout_ms: u64,
    /// Whether callers may request streaming
    pub streaming: bool,
    /// Preference order for `best_available_provider`
    pub provider_preference: Vec<String>,
    /// Interval of the registry's background health check
    pub health_check_interval_ms: u64,
    /// Circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings
    pub retry: RetryConfig,
    /// Rate limit settings
    pub rate_limit: RateLimitConfig,
    /// Cache settings
    pub cache: CacheConfig,
    /// Budget settings
    pub budget: BudgetConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            primary_model: ModelRef::new("openai", "gpt-5-mini"),
            fallback_models: vec![
                ModelRef::new("anthropic", "claude-haiku-4-5"),
                ModelRef::new("ollama", "llama3.2"),
            ],
            timeout_ms: 60_000,
            streaming: false,
            provider_preference: vec![
                "ollama".to_string(),
                "openai".to_string(),
                "anthropic".to_string(),
            ],
            health_check_interval_ms: 60_000,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EffectiveConfig {
    /// Default provider call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Background health check interval
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Check documented value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.timeout_ms == 0 {
            return fail("timeout_ms must be greater than zero".into());
        }
        if self.health_check_interval_ms == 0 {
            return fail("health_check_interval_ms must be greater than zero".into());
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 || cb.success_threshold == 0 {
            return fail("circuit_breaker thresholds must be at least 1".into());
        }

        let retry = &self.retry;
        if retry.max_retries > 10 {
            return fail(format!(
                "retry.max_retries must be 0-10, got {}",
                retry.max_retries
            ));
        }
        if retry.max_delay_ms < retry.initial_delay_ms {
            return fail(format!(
                "retry.max_delay_ms ({}) must be >= initial_delay_ms ({})",
                retry.max_delay_ms, retry.initial_delay_ms
            ));
        }
        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier <= 1.0 {
            return fail(format!(
                "retry.backoff_multiplier must be > 1, got {}",
                retry.backoff_multiplier
            ));
        }

        let rl = &self.rate_limit;
        if rl.enabled && (rl.requests_per_minute == 0 || rl.burst_size == 0) {
            return fail("rate_limit requests_per_minute and burst_size must be > 0".into());
        }

        for pattern in &self.cache.exclude_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return fail(format!("cache.exclude_patterns '{pattern}': {e}"));
            }
        }

        let budget = &self.budget;
        if budget.daily_limit.is_nan() || budget.daily_limit <= 0.0 {
            return fail(format!(
                "budget.daily_limit must be > 0, got {}",
                budget.daily_limit
            ));
        }
        if budget.monthly_limit.is_nan() || budget.monthly_limit < budget.daily_limit {
            return fail(format!(
                "budget.monthly_limit ({}) must be >= daily_limit ({})",
                budget.monthly_limit, budget.daily_limit
            ));
        }
        if !(budget.alert_threshold > 0.0 && budget.alert_threshold <= 100.0) {
            return fail(format!(
                "budget.alert_threshold must be in (0, 100], got {}",
                budget.alert_threshold
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// A loaded configuration and where it came from
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    /// The configuration
    pub config: EffectiveConfig,
    /// Highest-priority source that contributed
    pub source: ConfigSource,
    /// Path to the config file that was loaded (if any)
    pub path: Option<PathBuf>,
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/llm-gateway/gateway.toml` or
/// `~/.config/llm-gateway/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llm-gateway").join("gateway.toml"))
}

/// Parse an [`EffectiveConfig`] from TOML text
///
/// # Errors
///
/// Returns an error if the TOML is malformed or fails validation.
pub fn parse_config(toml_content: &str) -> Result<EffectiveConfig, ConfigError> {
    let config: EffectiveConfig = toml::from_str(toml_content)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from the default path plus the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<LoadedConfig, ConfigError> {
    load_config_from_path(default_config_path(), |key| std::env::var(key).ok())
}

/// Load configuration from a specific path with an environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_from_path(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<LoadedConfig, ConfigError> {
    let mut loaded = LoadedConfig {
        config: EffectiveConfig::default(),
        source: ConfigSource::Default,
        path: None,
    };

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;
            loaded.config = toml::from_str(&toml_content)?;
            loaded.source = ConfigSource::File;
            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
            loaded.path = Some(config_path);
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    if apply_env_config(&mut loaded.config, env) {
        loaded.source = ConfigSource::Env;
    }

    loaded.config.validate()?;
    Ok(loaded)
}

/// Apply `GATEWAY_*` environment overrides, returns true if any applied
pub fn apply_env_config(
    config: &mut EffectiveConfig,
    env: impl Fn(&str) -> Option<String>,
) -> bool {
    let mut applied = false;

    if let Some(model) = env("GATEWAY_PRIMARY_MODEL").and_then(|v| v.parse::<ModelRef>().ok()) {
        config.primary_model = model;
        applied = true;
    }
    if let Some(list) = env("GATEWAY_FALLBACK_MODELS") {
        let models: Vec<ModelRef> = list
            .split(',')
            .filter_map(|m| m.trim().parse().ok())
            .collect();
        config.fallback_models = models;
        applied = true;
    }
    if let Some(ms) = env("GATEWAY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.timeout_ms = ms;
        applied = true;
    }
    if let Some(limit) = env("GATEWAY_DAILY_LIMIT").and_then(|v| v.parse().ok()) {
        config.budget.daily_limit = limit;
        applied = true;
    }
    if let Some(limit) = env("GATEWAY_MONTHLY_LIMIT").and_then(|v| v.parse().ok()) {
        config.budget.monthly_limit = limit;
        applied = true;
    }
    if let Some(rpm) = env("GATEWAY_RATE_LIMIT_RPM").and_then(|v| v.parse().ok()) {
        config.rate_limit.requests_per_minute = rpm;
        applied = true;
    }
    if let Some(enabled) = env("GATEWAY_CACHE_ENABLED") {
        config.cache.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        applied = true;
    }
    if let Some(level) = env("GATEWAY_LOG_LEVEL") {
        config.observability.log_level = level;
        applied = true;
    }

    applied
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Command-line overrides, applied after file and environment
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Override the primary model
    pub primary_model: Option<ModelRef>,
    /// Override the provider call timeout
    pub timeout_ms: Option<u64>,
    /// Force caching off
    pub disable_cache: bool,
    /// Force rate limiting off
    pub disable_rate_limit: bool,
    /// Override the log level
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary model
    #[must_use]
    pub fn with_primary_model(mut self, model: ModelRef) -> Self {
        self.primary_model = Some(model);
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Turn caching off
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    /// Apply to a loaded configuration
    pub fn apply(&self, loaded: &mut LoadedConfig) {
        let before = loaded.config.clone();
        let config = &mut loaded.config;

        if let Some(model) = &self.primary_model {
            config.primary_model = model.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        if self.disable_cache {
            config.cache.enabled = false;
        }
        if self.disable_rate_limit {
            config.rate_limit.enabled = false;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }

        if *config != before {
            loaded.source = ConfigSource::Cli;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = EffectiveConfig::default();

        assert_eq!(config.primary_model.to_string(), "openai/gpt-5-mini");
        assert_eq!(config.fallback_models.len(), 2);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retryable_status_codes, vec![408, 429, 500, 502, 503, 504]);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.cache.key_prefix, "llm:cache:");
        assert!(config.budget.hard_stop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("llm-gateway"));
            assert!(p.to_string_lossy().ends_with("gateway.toml"));
        }
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_ranges() {
        let mut config = EffectiveConfig::default();
        config.retry.max_retries = 11;
        assert!(config.validate().is_err());

        let mut config = EffectiveConfig::default();
        config.retry.max_delay_ms = 10;
        assert!(config.validate().is_err());

        let mut config = EffectiveConfig::default();
        config.retry.backoff_multiplier = 1.0;
        assert!(config.validate().is_err());

        let mut config = EffectiveConfig::default();
        config.budget.daily_limit = 0.0;
        assert!(config.validate().is_err());

        let mut config = EffectiveConfig::default();
        config.budget.monthly_limit = 10.0;
        assert!(config.validate().is_err());

        let mut config = EffectiveConfig::default();
        config.budget.alert_threshold = 100.0;
        assert!(config.validate().is_ok());
        config.budget.alert_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = EffectiveConfig::default();
        config.cache.exclude_patterns = vec!["(unclosed".into()];
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_partial_toml() {
        let config = parse_config(
            r#"
primary_model = "anthropic/claude-sonnet-4-5"
fallback_models = ["openai/gpt-5"]

[retry]
max_retries = 5

[cache]
exclude_patterns = ["^secret-"]
"#,
        )
        .unwrap();

        assert_eq!(config.primary_model, ModelRef::new("anthropic", "claude-sonnet-4-5"));
        assert_eq!(config.fallback_models, vec![ModelRef::new("openai", "gpt-5")]);
        assert_eq!(config.retry.max_retries, 5);
        // untouched fields keep defaults
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.budget, BudgetConfig::default());
    }

    #[test]
    fn test_parse_empty_toml() {
        assert_eq!(parse_config("").unwrap(), EffectiveConfig::default());
    }

    #[test]
    fn test_parse_bad_model_ref() {
        assert!(matches!(
            parse_config(r#"primary_model = "gpt-5""#),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/gateway.toml");
        let loaded = load_config_from_path(Some(path), no_env).unwrap();
        assert_eq!(loaded.source, ConfigSource::Default);
        assert!(loaded.path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[retry\nmax_retries = \"x\"\n").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_file_then_env_priority() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"timeout_ms = 5000\n[budget]\ndaily_limit = 20.0\n")
            .unwrap();

        let loaded = load_config_from_path(
            Some(file.path().to_path_buf()),
            env_from(&[("GATEWAY_DAILY_LIMIT", "25"), ("GATEWAY_CACHE_ENABLED", "false")]),
        )
        .unwrap();

        assert_eq!(loaded.source, ConfigSource::Env);
        assert_eq!(loaded.config.timeout_ms, 5000);
        assert!((loaded.config.budget.daily_limit - 25.0).abs() < f64::EPSILON);
        assert!(!loaded.config.cache.enabled);
    }

    #[test]
    fn test_env_fallback_list() {
        let mut config = EffectiveConfig::default();
        let applied = apply_env_config(
            &mut config,
            env_from(&[("GATEWAY_FALLBACK_MODELS", "ollama/llama3.2, bogus ,openai/gpt-5")]),
        );
        assert!(applied);
        assert_eq!(
            config.fallback_models,
            vec![ModelRef::new("ollama", "llama3.2"), ModelRef::new("openai", "gpt-5")]
        );
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut loaded =
            load_config_from_path(None, env_from(&[("GATEWAY_TIMEOUT_MS", "1234")])).unwrap();
        ConfigOverrides::new()
            .with_timeout_ms(999)
            .without_cache()
            .apply(&mut loaded);

        assert_eq!(loaded.source, ConfigSource::Cli);
        assert_eq!(loaded.config.timeout_ms, 999);
        assert!(!loaded.config.cache.enabled);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut loaded = load_config_from_path(None, no_env).unwrap();
        ConfigOverrides::new().apply(&mut loaded);
        assert_eq!(loaded.source, ConfigSource::Default);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EffectiveConfig::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(parse_config(&text).unwrap(), config);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Persisted.to_string(), "persisted config");
    }
}
