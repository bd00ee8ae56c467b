//! Ollama Provider Implementation
//!
//! Local inference through the Ollama REST API:
//! - `/api/chat` - chat completions with message history
//! - `/api/tags` - list installed models (liveness probe and discovery)
//!
//! Installed models that are not in the static table are added to the
//! descriptor at runtime with zero cost.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::descriptor::{ModelCapabilities, ProviderDescriptor};
use super::health::ProviderHealth;
use super::traits::Provider;
use super::{build_http_client, error_for_status};
use crate::error::{InvocationError, InvocationErrorKind};
use crate::types::{
    FinishReason, MessageRole, NormalizedRequest, NormalizedResponse, TokenUsage, ToolCall,
};

/// Default local endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Context window assumed for discovered models
const DISCOVERED_CONTEXT_WINDOW: u32 = 8192;

/// Provider id
pub const OLLAMA: &str = "ollama";

/// Static model table
pub fn ollama_models() -> Vec<(String, ModelCapabilities)> {
    vec![
        (
            "llama3.2".to_string(),
            ModelCapabilities {
                supports_function_calling: true,
                ..ModelCapabilities::local(128_000)
            },
        ),
        (
            "qwen2.5-coder".to_string(),
            ModelCapabilities {
                supports_function_calling: true,
                quality_tier: 2,
                ..ModelCapabilities::local(32_768)
            },
        ),
    ]
}

/// Strip the implicit `:latest` tag Ollama reports
fn normalize_model_name(name: &str) -> &str {
    name.strip_suffix(":latest").unwrap_or(name)
}

/// Ollama provider
#[derive(Debug)]
pub struct OllamaProvider {
    descriptor: ProviderDescriptor,
    health: ProviderHealth,
    base_url: String,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider against `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self, InvocationError> {
        Ok(Self {
            descriptor: ProviderDescriptor::new(OLLAMA, "Ollama (local)", "llama3.2", ollama_models()),
            health: ProviderHealth::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: build_http_client(OLLAMA)?,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// List installed models and register any new ones
    pub async fn discover_models(&self) -> Result<Vec<String>, InvocationError> {
        let model = self.descriptor.default_model();
        let response = self
            .http_client
            .get(self.tags_url())
            .send()
            .await
            .map_err(|e| InvocationError::from_reqwest(OLLAMA, model, &e))?;
        let tags: TagsResponse = error_for_status(OLLAMA, model, response)
            .await?
            .json()
            .await
            .map_err(|e| InvocationError::from_reqwest(OLLAMA, model, &e))?;

        let names: Vec<String> = tags
            .models
            .iter()
            .map(|m| normalize_model_name(&m.name).to_string())
            .collect();
        for name in &names {
            if self
                .descriptor
                .add_model(name.clone(), ModelCapabilities::local(DISCOVERED_CONTEXT_WINDOW))
            {
                tracing::info!(provider = OLLAMA, model = %name, "Discovered local model");
            }
        }
        Ok(names)
    }

    fn build_body(request: &NormalizedRequest, model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            stream: false,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                        MessageRole::Tool => "tool",
                    }
                    .to_string(),
                    content: m.content.clone(),
                    tool_calls: m
                        .tool_calls
                        .iter()
                        .map(|c| WireToolCall {
                            function: WireFunction {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                        .collect(),
                })
                .collect(),
            options: WireOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_tokens,
                stop: request.options.stop_sequences.clone(),
            },
            tools: request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn health(&self) -> &ProviderHealth {
        &self.health
    }

    async fn send(
        &self,
        request: &NormalizedRequest,
        model: &str,
    ) -> Result<NormalizedResponse, InvocationError> {
        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request, model))
            .send()
            .await
            .map_err(|e| InvocationError::from_reqwest(OLLAMA, model, &e))?;
        let response = error_for_status(OLLAMA, model, response).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InvocationError::from_reqwest(OLLAMA, model, &e))?;
        let parsed: ChatResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            InvocationError::new(
                OLLAMA,
                model,
                InvocationErrorKind::InvalidResponse,
                format!("unexpected chat payload: {e}"),
            )
        })?;

        let tool_calls = parsed
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, c)| ToolCall {
                id: format!("call_{i}"),
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(NormalizedResponse {
            content: parsed.message.content,
            usage: TokenUsage::new(parsed.prompt_eval_count, parsed.eval_count),
            model: model.to_string(),
            provider: OLLAMA.to_string(),
            finish_reason: parsed
                .done_reason
                .as_deref()
                .map_or(FinishReason::Stop, FinishReason::from_vendor),
            tool_calls,
            raw: Some(raw),
            ..Default::default()
        })
    }

    async fn probe(&self) -> Result<(), InvocationError> {
        self.discover_models().await.map(|_| ())
    }

    async fn initialize(&self) -> Result<(), InvocationError> {
        let models = self.discover_models().await?;
        self.health.record_probe(true, std::time::Instant::now());
        tracing::info!(
            provider = OLLAMA,
            base_url = %self.base_url,
            installed = models.len(),
            "Provider initialized"
        );
        Ok(())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    stream: bool,
    messages: Vec<WireMessage>,
    options: WireOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: WireMessage,
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
