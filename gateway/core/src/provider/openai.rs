//! OpenAI Provider Implementation
//!
//! Talks to the OpenAI chat completions API, or any server exposing the same
//! surface via `OPENAI_BASE_URL`.
//!
//! - `POST /v1/chat/completions` - invocation
//! - `GET /v1/models` - availability probe (never billed)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::descriptor::{ModelCapabilities, ProviderDescriptor};
use super::health::ProviderHealth;
use super::traits::Provider;
use super::{build_http_client, error_for_status, parse_arguments};
use crate::error::{InvocationError, InvocationErrorKind};
use crate::types::{
    FinishReason, MessageRole, NormalizedRequest, NormalizedResponse, ReasoningEffort, TokenUsage,
    ToolCall, Verbosity,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Provider id
pub const OPENAI: &str = "openai";

/// Static model table
pub fn openai_models() -> Vec<(String, ModelCapabilities)> {
    let gpt5 = |input: f64, output: f64, tier: u8| ModelCapabilities {
        context_window: 400_000,
        max_output_tokens: 128_000,
        supports_vision: true,
        supports_function_calling: true,
        supports_streaming: true,
        supports_reasoning_effort: true,
        cost_per_input_token: input,
        cost_per_output_token: output,
        quality_tier: tier,
    };
    vec![
        ("gpt-5".to_string(), gpt5(0.000_001_25, 0.000_01, 5)),
        ("gpt-5-mini".to_string(), gpt5(0.000_000_25, 0.000_002, 3)),
        ("gpt-5-nano".to_string(), gpt5(0.000_000_05, 0.000_000_4, 2)),
        (
            "gpt-4o-mini".to_string(),
            ModelCapabilities {
                context_window: 128_000,
                max_output_tokens: 16_384,
                supports_vision: true,
                supports_function_calling: true,
                supports_streaming: true,
                supports_reasoning_effort: false,
                cost_per_input_token: 0.000_000_15,
                cost_per_output_token: 0.000_000_6,
                quality_tier: 2,
            },
        ),
    ]
}

/// OpenAI chat completions provider
#[derive(Debug)]
pub struct OpenAiProvider {
    descriptor: ProviderDescriptor,
    health: ProviderHealth,
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider for the public OpenAI API
    pub fn new(api_key: impl Into<String>) -> Result<Self, InvocationError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a provider against an OpenAI-compatible server
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, InvocationError> {
        Ok(Self {
            descriptor: ProviderDescriptor::new(OPENAI, "OpenAI", "gpt-5-mini", openai_models()),
            health: ProviderHealth::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: build_http_client(OPENAI)?,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    fn build_body(&self, request: &NormalizedRequest, model: &str) -> ChatRequest {
        let supports_reasoning = self
            .descriptor
            .capabilities(model)
            .is_some_and(|c| c.supports_reasoning_effort);

        let messages = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                },
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect();

        ChatRequest {
            model: model.to_string(),
            messages,
            temperature: request.options.temperature,
            max_completion_tokens: request.options.max_tokens,
            stop: request.options.stop_sequences.clone(),
            reasoning_effort: request
                .options
                .reasoning_effort
                .filter(|_| supports_reasoning),
            verbosity: request.options.verbosity.filter(|_| supports_reasoning),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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
        let body = self.build_body(request, model);
        let response = self
            .http_client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InvocationError::from_reqwest(OPENAI, model, &e))?;
        let response = error_for_status(OPENAI, model, response).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InvocationError::from_reqwest(OPENAI, model, &e))?;
        let parsed: ChatResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            InvocationError::new(
                OPENAI,
                model,
                InvocationErrorKind::InvalidResponse,
                format!("unexpected chat completion payload: {e}"),
            )
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            InvocationError::new(
                OPENAI,
                model,
                InvocationErrorKind::InvalidResponse,
                "chat completion contained no choices",
            )
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                arguments: parse_arguments(&c.function.arguments),
                name: c.function.name,
            })
            .collect();

        let usage = parsed.usage.unwrap_or_default();
        Ok(NormalizedResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            provider: OPENAI.to_string(),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map_or(FinishReason::Stop, FinishReason::from_vendor),
            tool_calls,
            raw: Some(raw),
            ..Default::default()
        })
    }

    async fn probe(&self) -> Result<(), InvocationError> {
        let model = self.descriptor.default_model();
        let response = self
            .http_client
            .get(self.models_url())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| InvocationError::from_reqwest(OPENAI, model, &e))?;
        error_for_status(OPENAI, model, response).await.map(|_| ())
    }

    async fn initialize(&self) -> Result<(), InvocationError> {
        if self.api_key.trim().is_empty() {
            return Err(InvocationError::new(
                OPENAI,
                self.descriptor.default_model(),
                InvocationErrorKind::Configuration,
                "OPENAI_API_KEY is empty",
            ));
        }
        let available = self.is_available().await;
        tracing::info!(provider = OPENAI, base_url = %self.base_url, available, "Provider initialized");
        Ok(())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbosity: Option<Verbosity>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
