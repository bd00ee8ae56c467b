//! Model Router
//!
//! Picks the primary model and a ranked fallback list for a request.
//!
//! # Precedence
//!
//! 1. Forced provider and/or model (the request's `model` override)
//! 2. Budget mode: economy picks the cheapest capable model, quality the
//!    highest capability score
//! 3. Task type default preferences
//!
//! Capability filtering (vision, tools, reasoning, context window) applies to
//! every strategy except forced routing. The router only reads the registry's
//! capability table and never performs I/O.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::EffectiveConfig;
use crate::provider::{approximate_tokens, ModelCapabilities};
use crate::registry::{AvailableModel, ProviderRegistry};
use crate::types::{BudgetMode, CostBreakdown, ModelRef, NormalizedRequest, TaskType};

/// Longest fallback chain a routed decision carries
pub const MAX_FALLBACKS: usize = 3;

/// Task type → preferred models, best first
pub fn task_preferences(task: TaskType) -> &'static [&'static str] {
    match task {
        TaskType::Classification | TaskType::Summarization | TaskType::Extraction => {
            &["gpt-5-nano", "claude-haiku-4-5", "gpt-4o-mini", "llama3.2"]
        }
        TaskType::CodeGeneration => &["claude-sonnet-4-5", "gpt-5", "qwen2.5-coder"],
        TaskType::Analysis | TaskType::Reasoning => &["gpt-5", "claude-sonnet-4-5", "gpt-5-mini"],
        TaskType::General => &["gpt-5-mini", "claude-haiku-4-5", "llama3.2"],
    }
}

/// Router errors
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// Nothing in the capability table satisfies the request
    #[error("no registered model can serve this request: {0}")]
    NoCapableModel(String),

    /// Forced provider is not registered
    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),

    /// Forced model is not served by the forced (or any) provider
    #[error("model '{model}' is not served by {provider}")]
    UnsupportedModel {
        /// Provider asked for, or "any registered provider"
        provider: String,
        /// Model asked for
        model: String,
    },
}

/// How a decision was produced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Chosen by the router
    Routed,
    /// Router failed; fixed primary/fallbacks from config
    Legacy,
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routed => write!(f, "routed"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// The result of a routing decision
#[derive(Clone, Debug, Serialize)]
pub struct RoutingDecision {
    /// Provider of the primary model
    pub provider: String,
    /// Primary model
    pub model: String,
    /// Primary model capabilities, unknown for unregistered legacy models
    pub capabilities: Option<ModelCapabilities>,
    /// Blended cost of 1K in + 1K out tokens on the primary
    pub estimated_cost_per_1k: f64,
    /// Why this model was chosen
    pub reason: String,
    /// Models to try, in order, if the primary fails
    pub fallbacks: Vec<ModelRef>,
    /// Routed or legacy
    pub mode: RoutingMode,
}

impl RoutingDecision {
    /// Primary as a `provider/model` pair
    pub fn primary(&self) -> ModelRef {
        ModelRef::new(&self.provider, &self.model)
    }

    /// Primary followed by fallbacks
    pub fn chain(&self) -> Vec<ModelRef> {
        std::iter::once(self.primary())
            .chain(self.fallbacks.iter().cloned())
            .collect()
    }
}

/// Pre-flight cost estimate for a task
#[derive(Clone, Debug, Serialize)]
pub struct CostEstimate {
    /// Provider that would serve the task
    pub provider: String,
    /// Model that would serve the task
    pub model: String,
    /// Cost split
    pub cost: CostBreakdown,
}

/// What a request needs from a model
#[derive(Clone, Copy, Debug, Default)]
struct Requirements {
    vision: bool,
    function_calling: bool,
    reasoning: bool,
    min_context: u64,
}

impl Requirements {
    fn for_request(request: &NormalizedRequest, task: TaskType, mode: Option<BudgetMode>) -> Self {
        let prompt_tokens = approximate_tokens(&request.prompt_text()) as u64;
        let output_tokens = u64::from(request.options.max_tokens.unwrap_or(0));
        Self {
            vision: request.controls.requires_vision,
            function_calling: request.has_tools(),
            reasoning: task == TaskType::Reasoning && mode == Some(BudgetMode::Quality),
            min_context: prompt_tokens + output_tokens,
        }
    }

    fn for_task(task: TaskType, mode: Option<BudgetMode>) -> Self {
        Self {
            reasoning: task == TaskType::Reasoning && mode == Some(BudgetMode::Quality),
            ..Self::default()
        }
    }

    fn admits(&self, caps: &ModelCapabilities) -> bool {
        (!self.vision || caps.supports_vision)
            && (!self.function_calling || caps.supports_function_calling)
            && (!self.reasoning || caps.supports_reasoning_effort)
            && u64::from(caps.context_window) >= self.min_context
    }

    fn describe(&self) -> String {
        let mut needs = Vec::new();
        if self.vision {
            needs.push("vision".to_string());
        }
        if self.function_calling {
            needs.push("function calling".to_string());
        }
        if self.reasoning {
            needs.push("reasoning".to_string());
        }
        if self.min_context > 0 {
            needs.push(format!("{} tokens of context", self.min_context));
        }
        if needs.is_empty() {
            "no models registered".to_string()
        } else {
            format!("requires {}", needs.join(", "))
        }
    }
}

fn by_cost(a: &AvailableModel, b: &AvailableModel) -> std::cmp::Ordering {
    a.capabilities
        .cost_per_1k()
        .total_cmp(&b.capabilities.cost_per_1k())
        .then_with(|| {
            b.capabilities
                .capability_score()
                .total_cmp(&a.capabilities.capability_score())
        })
        .then_with(|| a.model.cmp(&b.model))
}

fn by_capability(a: &AvailableModel, b: &AvailableModel) -> std::cmp::Ordering {
    b.capabilities
        .capability_score()
        .total_cmp(&a.capabilities.capability_score())
        .then_with(|| a.capabilities.cost_per_1k().total_cmp(&b.capabilities.cost_per_1k()))
        .then_with(|| a.model.cmp(&b.model))
}

/// Routes requests over the registry's capability table
#[derive(Debug, Clone)]
pub struct ModelRouter {
    registry: Arc<ProviderRegistry>,
}

impl ModelRouter {
    /// Router over `registry`
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Make a routing decision
    pub fn route(&self, request: &NormalizedRequest) -> Result<RoutingDecision, RouterError> {
        let task = request.metadata.task_type.unwrap_or_default();
        let mode = request.controls.budget_mode;

        if request.controls.force_provider.is_some() || request.model.is_some() {
            return self.route_forced(request, task, mode);
        }

        let requirements = Requirements::for_request(request, task, mode);
        let ranked = self.rank(task, mode, &requirements);
        let Some((primary, rest)) = ranked.split_first() else {
            return Err(RouterError::NoCapableModel(requirements.describe()));
        };

        let reason = match mode {
            Some(BudgetMode::Economy) => format!(
                "economy: cheapest capable model for {task} (${:.6}/1K)",
                primary.capabilities.cost_per_1k()
            ),
            Some(BudgetMode::Quality) => format!(
                "quality: most capable model for {task} (score {:.1})",
                primary.capabilities.capability_score()
            ),
            None if task_preferences(task).contains(&primary.model.as_str()) => {
                format!("default model for {task}")
            }
            None => format!("no preferred model for {task} is capable; cheapest capable model"),
        };

        let decision = Self::decision(primary, rest, reason);
        tracing::debug!(
            provider = %decision.provider,
            model = %decision.model,
            reason = %decision.reason,
            fallbacks = decision.fallbacks.len(),
            "Routed request"
        );
        Ok(decision)
    }

    fn route_forced(
        &self,
        request: &NormalizedRequest,
        task: TaskType,
        mode: Option<BudgetMode>,
    ) -> Result<RoutingDecision, RouterError> {
        let (provider, model, reason) = match &request.controls.force_provider {
            Some(name) => {
                let provider = self
                    .registry
                    .provider(name)
                    .ok_or_else(|| RouterError::UnknownProvider(name.clone()))?;
                let model = request
                    .model
                    .clone()
                    .unwrap_or_else(|| provider.descriptor().default_model().to_string());
                let reason = match &request.model {
                    Some(_) => format!("forced provider {name} and model {model}"),
                    None => format!("forced provider {name}, default model {model}"),
                };
                (provider, model, reason)
            }
            None => {
                let model = request.model.clone().unwrap_or_default();
                let provider = self.registry.provider_for_model(&model).ok_or_else(|| {
                    RouterError::UnsupportedModel {
                        provider: "any registered provider".into(),
                        model: model.clone(),
                    }
                })?;
                let reason = format!("forced model {model}");
                (provider, model, reason)
            }
        };

        let capabilities =
            provider
                .model_capabilities(&model)
                .ok_or_else(|| RouterError::UnsupportedModel {
                    provider: provider.name().to_string(),
                    model: model.clone(),
                })?;

        let primary = AvailableModel {
            provider: provider.name().to_string(),
            model,
            capabilities,
        };

        // A forced provider keeps fallbacks on that provider
        let requirements = Requirements::for_request(request, task, mode);
        let forced_provider = request.controls.force_provider.as_deref();
        let rest: Vec<AvailableModel> = self
            .rank(task, mode, &requirements)
            .into_iter()
            .filter(|m| forced_provider.map_or(true, |p| m.provider == p))
            .collect();

        Ok(Self::decision(&primary, &rest, reason))
    }

    fn decision(primary: &AvailableModel, rest: &[AvailableModel], reason: String) -> RoutingDecision {
        let mut seen = HashSet::new();
        seen.insert(primary.model.clone());
        let fallbacks = rest
            .iter()
            .filter(|m| seen.insert(m.model.clone()))
            .take(MAX_FALLBACKS)
            .map(|m| ModelRef::new(&m.provider, &m.model))
            .collect();

        RoutingDecision {
            provider: primary.provider.clone(),
            model: primary.model.clone(),
            capabilities: Some(primary.capabilities.clone()),
            estimated_cost_per_1k: primary.capabilities.cost_per_1k(),
            reason,
            fallbacks,
            mode: RoutingMode::Routed,
        }
    }

    /// Capability table with one entry per model; first registered provider wins
    fn table(&self) -> Vec<AvailableModel> {
        let mut seen = HashSet::new();
        self.registry
            .all_available_models()
            .into_iter()
            .filter(|m| seen.insert(m.model.clone()))
            .collect()
    }

    /// Capable models in strategy order
    fn rank(
        &self,
        task: TaskType,
        mode: Option<BudgetMode>,
        requirements: &Requirements,
    ) -> Vec<AvailableModel> {
        let mut capable: Vec<AvailableModel> = self
            .table()
            .into_iter()
            .filter(|m| requirements.admits(&m.capabilities))
            .collect();

        match mode {
            Some(BudgetMode::Economy) => {
                capable.sort_by(by_cost);
                capable
            }
            Some(BudgetMode::Quality) => {
                capable.sort_by(by_capability);
                capable
            }
            None => {
                let mut ordered = Vec::with_capacity(capable.len());
                for preferred in task_preferences(task) {
                    if let Some(idx) = capable.iter().position(|m| m.model == *preferred) {
                        ordered.push(capable.remove(idx));
                    }
                }
                capable.sort_by(by_cost);
                ordered.extend(capable);
                ordered
            }
        }
    }

    /// Decision built from the configured primary and fallbacks
    pub fn legacy_decision(&self, config: &EffectiveConfig, cause: &RouterError) -> RoutingDecision {
        let primary = &config.primary_model;
        let capabilities = self
            .registry
            .provider(&primary.provider)
            .and_then(|p| p.model_capabilities(&primary.model));
        let estimated_cost_per_1k = capabilities
            .as_ref()
            .map_or(0.0, ModelCapabilities::cost_per_1k);

        let mut seen = HashSet::new();
        seen.insert(primary.clone());
        let fallbacks = config
            .fallback_models
            .iter()
            .filter(|m| seen.insert((*m).clone()))
            .cloned()
            .collect();

        RoutingDecision {
            provider: primary.provider.clone(),
            model: primary.model.clone(),
            capabilities,
            estimated_cost_per_1k,
            reason: format!("routing failed ({cause}); using configured primary {primary}"),
            fallbacks,
            mode: RoutingMode::Legacy,
        }
    }

    /// Models recommended for `task`, best first
    pub fn recommended_models(&self, task: TaskType, mode: Option<BudgetMode>) -> Vec<AvailableModel> {
        self.rank(task, mode, &Requirements::for_task(task, mode))
    }

    /// Cost of running `task` on the model the router would pick
    pub fn estimate_task_cost(
        &self,
        task: TaskType,
        input_tokens: u64,
        output_tokens: u64,
        mode: Option<BudgetMode>,
    ) -> Result<CostEstimate, RouterError> {
        let requirements = Requirements {
            min_context: input_tokens + output_tokens,
            ..Requirements::for_task(task, mode)
        };
        let best = self
            .rank(task, mode, &requirements)
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::NoCapableModel(requirements.describe()))?;

        Ok(CostEstimate {
            cost: best.capabilities.estimate(input_tokens, output_tokens),
            provider: best.provider,
            model: best.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::provider::{AnthropicProvider, OllamaProvider, OpenAiProvider, Provider};
    use crate::types::ToolDefinition;

    fn router(with_ollama: bool) -> ModelRouter {
        let mut providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(OpenAiProvider::new("sk-test").unwrap()),
            Arc::new(AnthropicProvider::new("sk-ant-test").unwrap()),
        ];
        if with_ollama {
            providers.push(Arc::new(OllamaProvider::new("http://127.0.0.1:9").unwrap()));
        }
        ModelRouter::new(Arc::new(ProviderRegistry::from_providers(providers)))
    }

    fn models(refs: &[ModelRef]) -> Vec<&str> {
        refs.iter().map(|m| m.model.as_str()).collect()
    }

    #[test]
    fn test_task_default_classification() {
        let request = NormalizedRequest::from_prompt("label this").with_task_type(TaskType::Classification);
        let decision = router(true).route(&request).unwrap();

        assert_eq!(decision.model, "gpt-5-nano");
        assert_eq!(decision.provider, "openai");
        assert_eq!(decision.mode, RoutingMode::Routed);
        assert_eq!(
            models(&decision.fallbacks),
            vec!["claude-haiku-4-5", "gpt-4o-mini", "llama3.2"]
        );
        assert!(!decision.reason.is_empty());
    }

    #[test]
    fn test_task_default_code_generation() {
        let request = NormalizedRequest::from_prompt("write a parser").with_task_type(TaskType::CodeGeneration);
        let decision = router(true).route(&request).unwrap();
        assert_eq!(decision.model, "claude-sonnet-4-5");
        assert_eq!(models(&decision.fallbacks), vec!["gpt-5", "qwen2.5-coder", "llama3.2"]);
    }

    #[test]
    fn test_economy_picks_cheapest() {
        let request = NormalizedRequest::from_prompt("hi").with_budget_mode(BudgetMode::Economy);
        let decision = router(false).route(&request).unwrap();
        assert_eq!(decision.model, "gpt-5-nano");
        assert_eq!(models(&decision.fallbacks), vec!["gpt-4o-mini", "gpt-5-mini", "claude-haiku-4-5"]);
        assert!(decision.reason.starts_with("economy"));

        // Local models are free
        let decision = router(true).route(&request).unwrap();
        assert_eq!(decision.provider, "ollama");
    }

    #[test]
    fn test_quality_picks_most_capable() {
        let request = NormalizedRequest::from_prompt("prove it")
            .with_task_type(TaskType::Reasoning)
            .with_budget_mode(BudgetMode::Quality);
        let decision = router(true).route(&request).unwrap();

        assert_eq!(decision.model, "gpt-5");
        let scores: Vec<f64> = decision
            .chain()
            .iter()
            .map(|m| router(true).registry.model_capabilities(&m.model).unwrap().capability_score())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        // Reasoning in quality mode excludes non-reasoning models
        assert!(!models(&decision.fallbacks).contains(&"claude-haiku-4-5"));
    }

    #[test]
    fn test_tools_filter_out_models_without_function_calling() {
        let registry = ProviderRegistry::from_providers(vec![Arc::new(
            OllamaProvider::new("http://127.0.0.1:9").unwrap(),
        )]);
        registry.provider("ollama").unwrap().descriptor().add_model(
            "phi3",
            ModelCapabilities::local(4096),
        );
        let router = ModelRouter::new(Arc::new(registry));

        let request = NormalizedRequest::from_prompt("call it")
            .with_budget_mode(BudgetMode::Economy)
            .with_tool(ToolDefinition {
                name: "lookup".into(),
                description: "look something up".into(),
                parameters: serde_json::json!({"type": "object"}),
            });
        let decision = router.route(&request).unwrap();
        assert_ne!(decision.model, "phi3");
        assert!(!models(&decision.fallbacks).contains(&"phi3"));
    }

    #[test]
    fn test_context_window_filter() {
        let prompt = "x".repeat(4 * 150_000);
        let request = NormalizedRequest::from_prompt(prompt).with_budget_mode(BudgetMode::Economy);
        let decision = router(true).route(&request).unwrap();
        // Only the 200K+ windows remain
        for m in decision.chain() {
            let caps = router(true).registry.model_capabilities(&m.model).unwrap();
            assert!(caps.context_window >= 150_000);
        }
    }

    #[test]
    fn test_no_capable_model() {
        let request = NormalizedRequest::from_prompt("x".repeat(4 * 500_000));
        let err = router(true).route(&request).unwrap_err();
        assert!(matches!(err, RouterError::NoCapableModel(_)));
    }

    #[test]
    fn test_forced_provider_uses_default_model() {
        let request = NormalizedRequest::from_prompt("hi").with_force_provider("anthropic");
        let decision = router(true).route(&request).unwrap();
        assert_eq!(decision.model, "claude-haiku-4-5");
        assert!(decision.fallbacks.iter().all(|m| m.provider == "anthropic"));
    }

    #[test]
    fn test_forced_pair_validation() {
        let request = NormalizedRequest::from_prompt("hi").with_force_provider("mistral");
        assert_eq!(
            router(true).route(&request).unwrap_err(),
            RouterError::UnknownProvider("mistral".into())
        );

        let request = NormalizedRequest::from_prompt("hi")
            .with_force_provider("anthropic")
            .with_model("gpt-5");
        assert!(matches!(
            router(true).route(&request).unwrap_err(),
            RouterError::UnsupportedModel { .. }
        ));

        let request = NormalizedRequest::from_prompt("hi").with_model("gpt-5");
        let decision = router(true).route(&request).unwrap();
        assert_eq!(decision.primary(), ModelRef::new("openai", "gpt-5"));
        assert!(!models(&decision.fallbacks).contains(&"gpt-5"));
    }

    #[test]
    fn test_legacy_decision_from_config() {
        let mut config = EffectiveConfig::default();
        config.primary_model = ModelRef::new("openai", "gpt-5-mini");
        config.fallback_models = vec![
            ModelRef::new("openai", "gpt-5-mini"),
            ModelRef::new("anthropic", "claude-haiku-4-5"),
        ];

        let decision =
            router(false).legacy_decision(&config, &RouterError::NoCapableModel("test".into()));
        assert_eq!(decision.mode, RoutingMode::Legacy);
        assert_eq!(decision.model, "gpt-5-mini");
        assert!(decision.capabilities.is_some());
        assert_eq!(models(&decision.fallbacks), vec!["claude-haiku-4-5"]);
    }

    #[test]
    fn test_estimate_task_cost() {
        let estimate = router(false)
            .estimate_task_cost(TaskType::Classification, 100, 50, None)
            .unwrap();
        assert_eq!(estimate.model, "gpt-5-nano");
        assert!((estimate.cost.total_cost - 0.000_025).abs() < 1e-6);
    }

    #[test]
    fn test_recommended_models_economy_ascending() {
        let recs = router(false).recommended_models(TaskType::General, Some(BudgetMode::Economy));
        assert_eq!(recs.len(), 7);
        assert!(recs
            .windows(2)
            .all(|w| w[0].capabilities.cost_per_1k() <= w[1].capabilities.cost_per_1k()));
    }
}
