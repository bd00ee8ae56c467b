//! Provider and model descriptors

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{InvocationError, InvocationErrorKind};
use crate::types::{CostBreakdown, TokenUsage};

/// What a model supports and what it costs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Context window in tokens
    pub context_window: u32,
    /// Maximum tokens the model will generate
    pub max_output_tokens: u32,
    /// Accepts image input
    pub supports_vision: bool,
    /// Accepts tool definitions
    pub supports_function_calling: bool,
    /// Can stream tokens
    pub supports_streaming: bool,
    /// Accepts a reasoning effort hint
    pub supports_reasoning_effort: bool,
    /// USD per prompt token
    pub cost_per_input_token: f64,
    /// USD per completion token
    pub cost_per_output_token: f64,
    /// Relative quality tier (1 = smallest, 5 = frontier)
    pub quality_tier: u8,
}

impl ModelCapabilities {
    /// A zero-cost local model with a modest context window
    pub fn local(context_window: u32) -> Self {
        Self {
            context_window,
            max_output_tokens: 4096,
            supports_vision: false,
            supports_function_calling: false,
            supports_streaming: true,
            supports_reasoning_effort: false,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            quality_tier: 1,
        }
    }

    /// Cost of a call with the given token usage
    pub fn cost_for(&self, usage: &TokenUsage) -> CostBreakdown {
        self.estimate(u64::from(usage.input_tokens), u64::from(usage.output_tokens))
    }

    /// Cost for arbitrary token counts
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let input_cost = input_tokens as f64 * self.cost_per_input_token;
        let output_cost = output_tokens as f64 * self.cost_per_output_token;
        CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }

    /// Blended cost of 1K input plus 1K output tokens
    pub fn cost_per_1k(&self) -> f64 {
        self.estimate(1000, 1000).total_cost
    }

    /// Score used by quality routing, higher is more capable
    pub fn capability_score(&self) -> f64 {
        let mut score = f64::from(self.quality_tier) * 10.0;
        if self.supports_reasoning_effort {
            score += 3.0;
        }
        if self.supports_vision {
            score += 2.0;
        }
        if self.supports_function_calling {
            score += 2.0;
        }
        score + f64::from(self.context_window) / 100_000.0
    }
}

/// Identity and model table of one provider
///
/// The model table sits behind a lock because local-inference providers add
/// models they discover at runtime.
#[derive(Debug)]
pub struct ProviderDescriptor {
    name: String,
    display_name: String,
    default_model: String,
    models: RwLock<BTreeMap<String, ModelCapabilities>>,
}

impl ProviderDescriptor {
    /// Create a descriptor with an initial model table
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        default_model: impl Into<String>,
        models: impl IntoIterator<Item = (String, ModelCapabilities)>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            default_model: default_model.into(),
            models: RwLock::new(models.into_iter().collect()),
        }
    }

    /// Unique provider id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-facing name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Model used when the request names none
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Sorted list of supported models
    pub fn supported_models(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    /// Whether the provider serves `model`
    pub fn supports(&self, model: &str) -> bool {
        self.models.read().contains_key(model)
    }

    /// Capabilities of `model`
    pub fn capabilities(&self, model: &str) -> Option<ModelCapabilities> {
        self.models.read().get(model).cloned()
    }

    /// Snapshot of the whole model table
    pub fn models(&self) -> Vec<(String, ModelCapabilities)> {
        self.models
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Register a model discovered at runtime, returns true if it was new
    pub fn add_model(&self, model: impl Into<String>, capabilities: ModelCapabilities) -> bool {
        let model = model.into();
        let mut models = self.models.write();
        if models.contains_key(&model) {
            return false;
        }
        models.insert(model, capabilities);
        true
    }

    /// Reject models this provider does not serve
    pub fn validate_model(&self, model: &str) -> Result<(), InvocationError> {
        if self.supports(model) {
            return Ok(());
        }
        Err(InvocationError::new(
            &self.name,
            model,
            InvocationErrorKind::UnsupportedModel,
            format!(
                "model '{model}' is not supported by {}; supported models: {}",
                self.display_name,
                self.supported_models().join(", ")
            ),
        ))
    }
}
