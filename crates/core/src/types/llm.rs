use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::TenantId;

// =============================================================================
// Model Catalogue
// =============================================================================

/// A model offered by a provider, with its per-1k-token rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmModel {
    pub id: Uuid,
    /// Provider name (openai, anthropic, deepseek, mistral, google).
    pub provider: String,
    /// Wire model identifier sent to the provider.
    pub model_name: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub context_window: u32,
    pub is_active: bool,
}

impl LlmModel {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            model_name: model_name.into(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            context_window: 128_000,
            is_active: true,
        }
    }

    pub fn with_rates(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Cost of one call at this model's rates.
    pub fn estimate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let input_cost = (prompt_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let output_cost = (completion_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        input_cost + output_cost
    }
}

// =============================================================================
// Tenant Routing Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub model_id: Uuid,
}

/// Per-tenant model selection and provider keys.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub primary_model_id: Option<Uuid>,
    pub fallback_model_id: Option<Uuid>,
    #[serde(default)]
    pub routing_rules: HashMap<String, RoutingRule>,
    #[serde(default)]
    pub provider_api_keys: HashMap<String, Secret<String>>,
}

impl LlmConfig {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            primary_model_id: None,
            fallback_model_id: None,
            routing_rules: HashMap::new(),
            provider_api_keys: HashMap::new(),
        }
    }

    pub fn with_primary(mut self, model_id: Uuid) -> Self {
        self.primary_model_id = Some(model_id);
        self
    }

    pub fn with_fallback(mut self, model_id: Uuid) -> Self {
        self.fallback_model_id = Some(model_id);
        self
    }

    pub fn with_rule(mut self, task_type: impl Into<String>, model_id: Uuid) -> Self {
        self.routing_rules
            .insert(task_type.into(), RoutingRule { model_id });
        self
    }

    pub fn with_api_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.provider_api_keys
            .insert(provider.into(), Secret::new(key.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPriority {
    Cost,
    Speed,
    Quality,
    #[default]
    Balanced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cost() {
        let model = LlmModel::new("openai", "gpt-4o").with_rates(0.005, 0.015);
        let cost = model.estimate_cost(1000, 500);
        assert!((cost - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn test_config_debug_redacts_keys() {
        let cfg = LlmConfig::new(Uuid::new_v4()).with_api_key("openai", "sk-live-123");
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("sk-live-123"));
    }
}
