//! Normalized request/response types shared by every provider
//!
//! Callers build a [`NormalizedRequest`] without knowing which vendor will
//! serve it; providers translate it to their wire format and hand back a
//! [`NormalizedResponse`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

// ============================================================================
// Model References
// ============================================================================

/// A `provider/model` pair, written as `"provider/model"` in config files
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelRef {
    /// Provider name (`openai`, `anthropic`, `ollama`, ...)
    pub provider: String,
    /// Model identifier as the provider knows it
    pub model: String,
}

impl ModelRef {
    /// Create a new model reference
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl FromStr for ModelRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(format!("expected 'provider/model', got '{s}'")),
        }
    }
}

impl TryFrom<String> for ModelRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelRef> for String {
    fn from(value: ModelRef) -> Self {
        value.to_string()
    }
}

// ============================================================================
// Task Types and Budget Modes
// ============================================================================

/// Kind of work a request performs, drives default model selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Label or categorize input
    Classification,
    /// Condense input
    Summarization,
    /// Pull structured fields out of text
    Extraction,
    /// Write or modify code
    CodeGeneration,
    /// Multi-step analysis of a document or system
    Analysis,
    /// Hard multi-step reasoning
    Reasoning,
    /// General chat
    #[default]
    General,
}

impl TaskType {
    /// All task types
    pub const ALL: [TaskType; 7] = [
        Self::Classification,
        Self::Summarization,
        Self::Extraction,
        Self::CodeGeneration,
        Self::Analysis,
        Self::Reasoning,
        Self::General,
    ];

    /// Snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Summarization => "summarization",
            Self::Extraction => "extraction",
            Self::CodeGeneration => "code_generation",
            Self::Analysis => "analysis",
            Self::Reasoning => "reasoning",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.to_ascii_lowercase().replace('-', "_"))
            .ok_or_else(|| format!("unknown task type '{s}'"))
    }
}

/// Routing preference trading cost against capability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Cheapest model that can serve the request
    Economy,
    /// Most capable model that can serve the request
    Quality,
}

impl fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Economy => write!(f, "economy"),
            Self::Quality => write!(f, "quality"),
        }
    }
}

impl FromStr for BudgetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "economy" => Ok(Self::Economy),
            "quality" => Ok(Self::Quality),
            _ => Err(format!("unknown budget mode '{s}'")),
        }
    }
}

// ============================================================================
// Messages and Tools
// ============================================================================

/// Chat message role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt
    System,
    /// End-user turn
    User,
    /// Model turn
    Assistant,
    /// Tool result
    Tool,
}

/// A tool invocation requested by the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned call id
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments as JSON
    pub arguments: serde_json::Value,
}

/// A tool the model may call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// What the tool does
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: serde_json::Value,
}

/// One message in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Tool calls made by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Tool` messages, the call this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a message with plain text content
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

// ============================================================================
// Request
// ============================================================================

/// Reasoning effort hint for models that support it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Minimal
    Minimal,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
}

impl ReasoningEffort {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Output verbosity hint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
}

/// Per-request generation options
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Reasoning effort hint
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Verbosity hint
    pub verbosity: Option<Verbosity>,
    /// Per-request timeout override in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Caller identity and intent, copied onto the usage record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Correlation id
    pub request_id: String,
    /// Calling agent, if any
    pub agent_name: Option<String>,
    /// Free-form purpose label
    pub purpose: Option<String>,
    /// Task type, drives routing
    pub task_type: Option<TaskType>,
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            agent_name: None,
            purpose: None,
            task_type: None,
        }
    }
}

/// Per-invocation gateway controls
#[derive(Clone, Debug)]
pub struct InvocationControls {
    /// Read and write the response cache (default true)
    pub use_cache: bool,
    /// Skip the rate limiter entirely
    pub bypass_rate_limit: bool,
    /// Fail fast to the fallback chain instead of retrying
    pub skip_retries: bool,
    /// Force a specific provider
    pub force_provider: Option<String>,
    /// Routing preference
    pub budget_mode: Option<BudgetMode>,
    /// Request contains images
    pub requires_vision: bool,
    /// Aborts the in-flight provider call when cancelled
    pub cancel: Option<CancellationToken>,
}

impl Default for InvocationControls {
    fn default() -> Self {
        Self {
            use_cache: true,
            bypass_rate_limit: false,
            skip_retries: false,
            force_provider: None,
            budget_mode: None,
            requires_vision: false,
            cancel: None,
        }
    }
}

/// A vendor-neutral chat completion request
#[derive(Clone, Debug, Default)]
pub struct NormalizedRequest {
    /// Ordered conversation
    pub messages: Vec<ChatMessage>,
    /// Model override; treated as a forced model by the router
    pub model: Option<String>,
    /// Generation options
    pub options: RequestOptions,
    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
    /// Caller metadata
    pub metadata: RequestMetadata,
    /// Gateway controls
    pub controls: InvocationControls,
}

impl NormalizedRequest {
    /// Create a request from a list of messages
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Single user prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(prompt)])
    }

    /// Set the system prompt (prepended)
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.messages.insert(0, ChatMessage::system(system));
        self
    }

    /// Override the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.options.temperature = Some(temp);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.options.max_tokens = Some(max);
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Add a tool definition
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Set the task type
    pub fn with_task_type(mut self, task: TaskType) -> Self {
        self.metadata.task_type = Some(task);
        self
    }

    /// Set the calling agent name
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.metadata.agent_name = Some(agent.into());
        self
    }

    /// Set the purpose label
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.metadata.purpose = Some(purpose.into());
        self
    }

    /// Set the budget mode
    pub fn with_budget_mode(mut self, mode: BudgetMode) -> Self {
        self.controls.budget_mode = Some(mode);
        self
    }

    /// Force a provider
    pub fn with_force_provider(mut self, provider: impl Into<String>) -> Self {
        self.controls.force_provider = Some(provider.into());
        self
    }

    /// Enable or disable cache use for this call
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.controls.use_cache = use_cache;
        self
    }

    /// Skip the rate limiter
    pub fn bypass_rate_limit(mut self) -> Self {
        self.controls.bypass_rate_limit = true;
        self
    }

    /// Fail fast to fallbacks
    pub fn skip_retries(mut self) -> Self {
        self.controls.skip_retries = true;
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.controls.cancel = Some(token);
        self
    }

    /// Per-request timeout, if set
    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout_ms.map(Duration::from_millis)
    }

    /// Whether any message or definition involves tools
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
            || self
                .messages
                .iter()
                .any(|m| !m.tool_calls.is_empty() || m.role == MessageRole::Tool)
    }

    /// Concatenated message text, used for token estimates
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Check a request at the gateway boundary, before admission control
pub fn validate_request(request: &NormalizedRequest) -> Result<(), GatewayError> {
    let invalid = |msg: String| Err(GatewayError::InvalidRequest(msg));

    if request.messages.is_empty() {
        return invalid("at least one message is required".into());
    }
    for (i, message) in request.messages.iter().enumerate() {
        if message.content.trim().is_empty() && message.tool_calls.is_empty() {
            return invalid(format!("message {i} has no content"));
        }
    }
    if let Some(temp) = request.options.temperature {
        if !(0.0..=2.0).contains(&temp) {
            return invalid(format!("temperature {temp} outside 0.0-2.0"));
        }
    }
    if request.options.max_tokens == Some(0) {
        return invalid("max_tokens must be greater than zero".into());
    }
    if request.options.timeout_ms == Some(0) {
        return invalid("timeout must be greater than zero".into());
    }
    if let Some(model) = &request.model {
        if model.trim().is_empty() {
            return invalid("model override must not be empty".into());
        }
    }
    Ok(())
}

// ============================================================================
// Response
// ============================================================================

/// Token accounting for one call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Completion tokens
    pub output_tokens: u32,
    /// Sum of both
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build from input/output counts
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

/// Dollar cost of one call
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Cost of prompt tokens
    pub input_cost: f64,
    /// Cost of completion tokens
    pub output_cost: f64,
    /// Sum of both
    pub total_cost: f64,
}

/// Why the model stopped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn or stop sequence
    #[default]
    Stop,
    /// Hit the output token limit
    Length,
    /// Model requested tool calls
    ToolCalls,
    /// Vendor content filter
    ContentFilter,
    /// Anything else
    Other,
}

impl FinishReason {
    /// Map a vendor finish/stop reason string
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "content_filter" | "refusal" => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}

/// A vendor-neutral chat completion response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Generated text
    pub content: String,
    /// Token accounting
    pub usage: TokenUsage,
    /// Model that actually served the call
    pub model: String,
    /// Provider that actually served the call
    pub provider: String,
    /// Wall-clock latency in milliseconds
    pub latency_ms: u64,
    /// Why generation stopped
    pub finish_reason: FinishReason,
    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Raw vendor payload, debug only, never cached
    #[serde(skip)]
    pub raw: Option<serde_json::Value>,
    /// Cost computed by the gateway
    #[serde(default)]
    pub cost: Option<CostBreakdown>,
    /// Served from the response cache
    #[serde(default)]
    pub cache_hit: bool,
    /// Retries spent on the primary model
    #[serde(default)]
    pub retry_count: u32,
    /// Served by a fallback model
    #[serde(default)]
    pub fallback_used: bool,
}
