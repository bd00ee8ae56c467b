//! LLM Providers
//!
//! One [`Provider`] implementation per vendor, each a thin `reqwest` client
//! over the vendor's HTTP API.
//!
//! # Supported Providers
//!
//! - **OpenAI**: chat completions API (or any compatible server)
//! - **Anthropic**: messages API
//! - **Ollama**: local inference, discovers installed models

pub mod anthropic;
pub mod descriptor;
pub mod health;
pub mod ollama;
pub mod openai;
pub mod traits;

use std::time::Duration;

pub use anthropic::AnthropicProvider;
pub use descriptor::{ModelCapabilities, ProviderDescriptor};
pub use health::{ProviderHealth, ProviderHealthStatus};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use traits::{approximate_tokens, Provider, ProviderCredentials, DEFAULT_AVAILABILITY_TTL};

use crate::error::{InvocationError, InvocationErrorKind};

/// Upper bound on any single HTTP exchange; the gateway applies tighter
/// per-request deadlines on top
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest vendor error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn build_http_client(provider: &str) -> Result<reqwest::Client, InvocationError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| {
            InvocationError::new(
                provider,
                "",
                InvocationErrorKind::Configuration,
                format!("failed to build HTTP client: {e}"),
            )
        })
}

/// Turn a non-success status into an `Http` invocation error carrying the body
pub(crate) async fn error_for_status(
    provider: &str,
    model: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, InvocationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    Err(InvocationError::new(
        provider,
        model,
        InvocationErrorKind::Http {
            status: status.as_u16(),
        },
        format!("{provider} returned {status}: {body}"),
    ))
}

/// Tool arguments arrive as a JSON string on some APIs
pub(crate) fn parse_arguments(arguments: &str) -> serde_json::Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| serde_json::Value::String(arguments.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(r#"{"a":1}"#)["a"], 1);
        assert_eq!(parse_arguments("not json"), serde_json::json!("not json"));
    }
}
