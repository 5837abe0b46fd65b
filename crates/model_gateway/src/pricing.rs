//! Model rates and per-task cost accounting.

use serde::Serialize;

use orchestra_core::{traits::LlmUsage, types::LlmModel};

/// Catalogue seeded on first boot. Rates are USD per 1K tokens.
pub fn default_models() -> Vec<LlmModel> {
    vec![
        LlmModel::new("openai", "gpt-4o-mini").with_rates(0.000_15, 0.000_6),
        LlmModel::new("openai", "gpt-4o").with_rates(0.002_5, 0.01),
        LlmModel::new("anthropic", "claude-3-5-haiku-20241022").with_rates(0.000_8, 0.004),
        LlmModel::new("anthropic", "claude-3-5-sonnet-20241022").with_rates(0.003, 0.015),
        LlmModel::new("deepseek", "deepseek-chat").with_rates(0.000_27, 0.001_1),
        LlmModel::new("mistral", "mistral-large-latest").with_rates(0.002, 0.006),
        LlmModel::new("google", "gemini-1.5-flash").with_rates(0.000_075, 0.000_3),
    ]
}

/// Token and cost totals across the LLM calls of one task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostTracker {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    pub calls: u32,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return its cost.
    pub fn record(&mut self, model: &LlmModel, usage: LlmUsage) -> f64 {
        let cost = model.estimate_cost(usage.prompt_tokens, usage.completion_tokens);
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.cost += cost;
        self.calls += 1;
        cost
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn merge(&mut self, other: &CostTracker) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cost += other.cost;
        self.calls += other.calls;
    }
}
