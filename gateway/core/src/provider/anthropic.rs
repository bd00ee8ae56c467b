//! Anthropic Provider Implementation
//!
//! - `POST /v1/messages` - invocation
//! - `GET /v1/models` - availability probe

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic requires `max_tokens`; used when the request sets none
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Provider id
pub const ANTHROPIC: &str = "anthropic";

/// Static model table
pub fn anthropic_models() -> Vec<(String, ModelCapabilities)> {
    let claude = |input: f64, output: f64, max_out: u32, tier: u8| ModelCapabilities {
        context_window: 200_000,
        max_output_tokens: max_out,
        supports_vision: true,
        supports_function_calling: true,
        supports_streaming: true,
        supports_reasoning_effort: tier >= 4,
        cost_per_input_token: input,
        cost_per_output_token: output,
        quality_tier: tier,
    };
    vec![
        (
            "claude-opus-4-1".to_string(),
            claude(0.000_015, 0.000_075, 32_000, 5),
        ),
        (
            "claude-sonnet-4-5".to_string(),
            claude(0.000_003, 0.000_015, 64_000, 4),
        ),
        (
            "claude-haiku-4-5".to_string(),
            claude(0.000_001, 0.000_005, 64_000, 3),
        ),
    ]
}

/// Anthropic messages API provider
#[derive(Debug)]
pub struct AnthropicProvider {
    descriptor: ProviderDescriptor,
    health: ProviderHealth,
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a provider for the public Anthropic API
    pub fn new(api_key: impl Into<String>) -> Result<Self, InvocationError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a provider against a custom endpoint
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, InvocationError> {
        Ok(Self {
            descriptor: ProviderDescriptor::new(
                ANTHROPIC,
                "Anthropic",
                "claude-haiku-4-5",
                anthropic_models(),
            ),
            health: ProviderHealth::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: build_http_client(ANTHROPIC)?,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    fn build_body(request: &NormalizedRequest, model: &str) -> MessagesRequest {
        let mut system = Vec::new();
        let mut messages = Vec::new();

        for message in &request.messages {
            match message.role {
                MessageRole::System => system.push(message.content.clone()),
                MessageRole::User => messages.push(WireMessage::text("user", &message.content)),
                MessageRole::Assistant => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: message.content.clone(),
                        });
                    }
                    blocks.extend(message.tool_calls.iter().map(|c| ContentBlock::ToolUse {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        input: c.arguments.clone(),
                    }));
                    messages.push(WireMessage {
                        role: "assistant",
                        content: blocks,
                    });
                }
                MessageRole::Tool => messages.push(WireMessage {
                    role: "user",
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.content.clone(),
                    }],
                }),
            }
        }

        MessagesRequest {
            model: model.to_string(),
            max_tokens: request.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            temperature: request.options.temperature.map(|t| t.min(1.0)),
            stop_sequences: request.options.stop_sequences.clone(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_body(request, model))
            .send()
            .await
            .map_err(|e| InvocationError::from_reqwest(ANTHROPIC, model, &e))?;
        let response = error_for_status(ANTHROPIC, model, response).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InvocationError::from_reqwest(ANTHROPIC, model, &e))?;
        let parsed: MessagesResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            InvocationError::new(
                ANTHROPIC,
                model,
                InvocationErrorKind::InvalidResponse,
                format!("unexpected messages payload: {e}"),
            )
        })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
            }
        }

        Ok(NormalizedResponse {
            content,
            usage: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            provider: ANTHROPIC.to_string(),
            finish_reason: parsed
                .stop_reason
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
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| InvocationError::from_reqwest(ANTHROPIC, model, &e))?;
        error_for_status(ANTHROPIC, model, response).await.map(|_| ())
    }

    async fn initialize(&self) -> Result<(), InvocationError> {
        if self.api_key.trim().is_empty() {
            return Err(InvocationError::new(
                ANTHROPIC,
                self.descriptor.default_model(),
                InvocationErrorKind::Configuration,
                "ANTHROPIC_API_KEY is empty",
            ));
        }
        let available = self.is_available().await;
        tracing::info!(provider = ANTHROPIC, available, "Provider initialized");
        Ok(())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

impl WireMessage {
    fn text(role: &'static str, text: &str) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn test_build_body_lifts_system_prompt() {
        let request = NormalizedRequest::new(vec![
            ChatMessage::system("rule one"),
            ChatMessage::system("rule two"),
            ChatMessage::user("hello"),
        ]);
        let body = serde_json::to_value(AnthropicProvider::build_body(
            &request,
            "claude-haiku-4-5",
        ))
        .unwrap();

        assert_eq!(body["system"], "rule one\n\nrule two");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn test_temperature_clamped_to_vendor_range() {
        let request = NormalizedRequest::from_prompt("hi").with_temperature(1.7);
        let body = AnthropicProvider::build_body(&request, "claude-haiku-4-5");
        assert_eq!(body.temperature, Some(1.0));
    }

    #[test]
    fn test_parse_tool_use_response() {
        let payload = serde_json::json!({
            "model": "claude-haiku-4-5",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 11}
        });
        let parsed: MessagesResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert_eq!(parsed.usage.output_tokens, 11);
        assert_eq!(
            FinishReason::from_vendor(parsed.stop_reason.as_deref().unwrap()),
            FinishReason::ToolCalls
        );
    }

    #[test]
    fn test_catalog() {
        let provider = AnthropicProvider::new("key").unwrap();
        let caps = provider.model_capabilities("claude-sonnet-4-5").unwrap();
        assert!((caps.cost_per_input_token - 0.000_003).abs() < 1e-12);
        assert!(provider.model_capabilities("gpt-5").is_none());
    }
}
