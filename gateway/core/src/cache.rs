//! Response cache
//!
//! The cache key is `key_prefix + fingerprint`, where the fingerprint is the
//! hex SHA-256 of a canonical JSON rendering of everything that affects the
//! model's output. Canonical means object keys are sorted at every depth, so
//! the fingerprint never depends on field insertion order.

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::ports::CachePort;
use crate::types::{NormalizedRequest, NormalizedResponse};

// ============================================================================
// Fingerprinting
// ============================================================================

/// Render `value` as JSON with object keys sorted recursively
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Output-affecting content of a request
fn fingerprint_material(request: &NormalizedRequest) -> Value {
    json!({
        "messages": request.messages,
        "model": request.model,
        "temperature": request.options.temperature,
        "max_tokens": request.options.max_tokens,
        "stop_sequences": request.options.stop_sequences,
        "reasoning_effort": request.options.reasoning_effort,
        "verbosity": request.options.verbosity,
        "tools": request.tools,
        "task_type": request.metadata.task_type,
        "budget_mode": request.controls.budget_mode,
        "force_provider": request.controls.force_provider,
        "requires_vision": request.controls.requires_vision,
    })
}

/// Deterministic hex SHA-256 fingerprint of a request
pub fn fingerprint(request: &NormalizedRequest) -> String {
    let canonical = canonical_json(&fingerprint_material(request));
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

// ============================================================================
// Response Cache
// ============================================================================

/// Cache policy over an optional [`CachePort`]
#[derive(Clone)]
pub struct ResponseCache {
    port: Option<Arc<dyn CachePort>>,
    config: CacheConfig,
    excludes: Vec<Regex>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("connected", &self.port.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl ResponseCache {
    /// Build a cache; invalid exclude patterns are logged and ignored
    pub fn new(port: Option<Arc<dyn CachePort>>, config: CacheConfig) -> Self {
        let excludes = config
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(%pattern, error = %err, "Ignoring invalid cache exclude pattern");
                    None
                }
            })
            .collect();
        Self {
            port,
            config,
            excludes,
        }
    }

    /// Whether this request may read or write the cache
    pub fn applies_to(&self, request: &NormalizedRequest) -> bool {
        if self.port.is_none() || !self.config.enabled || !request.controls.use_cache {
            return false;
        }
        let labels = [
            request.metadata.purpose.as_deref(),
            request.metadata.agent_name.as_deref(),
        ];
        !labels
            .into_iter()
            .flatten()
            .any(|label| self.excludes.iter().any(|re| re.is_match(label)))
    }

    /// Full cache key for a request
    pub fn key_for(&self, request: &NormalizedRequest) -> String {
        format!("{}{}", self.config.key_prefix, fingerprint(request))
    }

    /// Cached response, tagged as a cache hit
    pub async fn lookup(&self, request: &NormalizedRequest) -> Option<NormalizedResponse> {
        if !self.applies_to(request) {
            return None;
        }
        let port = self.port.as_ref()?;
        let key = self.key_for(request);

        let raw = match port.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(error = %err, "Cache read failed, continuing without cache");
                return None;
            }
        };

        match serde_json::from_str::<NormalizedResponse>(&raw) {
            Ok(mut response) => {
                response.cache_hit = true;
                response.latency_ms = 0;
                response.retry_count = 0;
                Some(response)
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store a successful response; returns whether it was written
    ///
    /// Exchanges involving tools are never cached.
    pub async fn store(&self, request: &NormalizedRequest, response: &NormalizedResponse) -> bool {
        if !self.applies_to(request) || request.has_tools() || !response.tool_calls.is_empty() {
            return false;
        }
        let Some(port) = self.port.as_ref() else {
            return false;
        };

        let mut cached = response.clone();
        cached.cache_hit = false;
        let value = match serde_json::to_string(&cached) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize response for cache");
                return false;
            }
        };

        match port
            .set_with_ttl(&self.key_for(request), &value, self.config.ttl_secs)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "Cache write failed");
                false
            }
        }
    }

    /// Close the underlying connection, if any
    pub async fn close(&self) {
        if let Some(port) = &self.port {
            port.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ports::InMemoryCache;
    use crate::types::{ChatMessage, ToolCall};

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":[{"y":1,"x":2}],"c":null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"c":null,"d":[{"x":2,"y":1}]},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"c":null,"d":[{"x":2,"y":1}]},"b":1}"#);
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let base = || {
            NormalizedRequest::from_prompt("Summarize this")
                .with_model("gpt-5-nano")
                .with_temperature(0.2)
                .with_max_tokens(100)
        };
        let fp = fingerprint(&base());
        assert_eq!(fp.len(), 64);
        // request_id differs between the two, fingerprint does not
        assert_eq!(fp, fingerprint(&base()));

        let variants = [
            NormalizedRequest::from_prompt("Summarize that")
                .with_model("gpt-5-nano")
                .with_temperature(0.2)
                .with_max_tokens(100),
            base().with_model("gpt-5-mini"),
            base().with_temperature(0.3),
            base().with_max_tokens(101),
        ];
        for variant in &variants {
            assert_ne!(fp, fingerprint(variant));
        }
    }

    #[test]
    fn test_fingerprint_ignores_message_field_order() {
        let parsed: ChatMessage =
            serde_json::from_str(r#"{"content":"hi","role":"user"}"#).unwrap();
        let built = ChatMessage::user("hi");
        assert_eq!(
            fingerprint(&NormalizedRequest::new(vec![parsed])),
            fingerprint(&NormalizedRequest::new(vec![built]))
        );
    }

    fn cache_with(config: CacheConfig) -> (Arc<InMemoryCache>, ResponseCache) {
        let port = InMemoryCache::shared(Arc::new(ManualClock::new()));
        let cache = ResponseCache::new(Some(port.clone() as Arc<dyn CachePort>), config);
        (port, cache)
    }

    fn response() -> NormalizedResponse {
        NormalizedResponse {
            content: "cached answer".into(),
            provider: "openai".into(),
            model: "gpt-5-nano".into(),
            latency_ms: 900,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let (port, cache) = cache_with(CacheConfig::default());
        let request = NormalizedRequest::from_prompt("hello");

        assert!(cache.store(&request, &response()).await);
        let hit = cache.lookup(&request).await.unwrap();
        assert!(hit.cache_hit);
        assert_eq!(hit.latency_ms, 0);
        assert_eq!(hit.content, "cached answer");

        let key = cache.key_for(&request);
        assert!(key.starts_with("llm:cache:"));
        assert_eq!(port.set_count(), 1);
    }

    #[tokio::test]
    async fn test_opt_out_touches_nothing() {
        let (port, cache) = cache_with(CacheConfig::default());
        let request = NormalizedRequest::from_prompt("hello").with_cache(false);

        assert!(!cache.store(&request, &response()).await);
        assert!(cache.lookup(&request).await.is_none());
        assert_eq!(port.get_count(), 0);
        assert_eq!(port.set_count(), 0);
    }

    #[tokio::test]
    async fn test_tool_calls_not_cached() {
        let (port, cache) = cache_with(CacheConfig::default());
        let request = NormalizedRequest::from_prompt("what's the weather");
        let mut resp = response();
        resp.tool_calls.push(ToolCall {
            id: "1".into(),
            name: "weather".into(),
            arguments: json!({}),
        });

        assert!(!cache.store(&request, &resp).await);
        assert_eq!(port.set_count(), 0);
    }

    #[tokio::test]
    async fn test_exclude_patterns() {
        let (port, cache) = cache_with(CacheConfig {
            exclude_patterns: vec!["^audit-".into(), "(".into()],
            ..CacheConfig::default()
        });
        let excluded = NormalizedRequest::from_prompt("x").with_purpose("audit-trail");
        let included = NormalizedRequest::from_prompt("x").with_purpose("summary");

        assert!(!cache.applies_to(&excluded));
        assert!(cache.applies_to(&included));
        assert!(cache.lookup(&excluded).await.is_none());
        assert_eq!(port.get_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_port_degrades() {
        let (port, cache) = cache_with(CacheConfig::default());
        port.set_failing(true);
        let request = NormalizedRequest::from_prompt("hello");
        assert!(!cache.store(&request, &response()).await);
        assert!(cache.lookup(&request).await.is_none());
    }
}
