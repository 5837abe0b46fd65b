//! Per-tenant model routing.
//!
//! Order: routing rule for the task type, tenant primary, tenant fallback,
//! deployment defaults, then the active catalogue ranked by priority.

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    config::LlmSettings,
    traits::{LlmCatalog, LlmClient, ModelResolver, ResolvedModel},
    types::{LlmConfig, LlmModel, RoutingPriority, TenantId},
    Error, Result,
};

use crate::providers::ProviderFactory;

pub struct ModelRouter {
    catalog: Arc<dyn LlmCatalog>,
    factory: ProviderFactory,
    default_primary: Option<String>,
    default_fallback: Option<String>,
    clients: DashMap<(TenantId, String), Arc<dyn LlmClient>>,
}

impl ModelRouter {
    pub fn new(catalog: Arc<dyn LlmCatalog>, settings: LlmSettings) -> Result<Self> {
        Ok(Self {
            catalog,
            default_primary: settings.default_primary_model.clone(),
            default_fallback: settings.default_fallback_model.clone(),
            factory: ProviderFactory::new(settings)?,
            clients: DashMap::new(),
        })
    }

    /// Drop cached clients for a tenant, e.g. after its provider keys change.
    pub fn invalidate(&self, tenant: TenantId) {
        self.clients.retain(|(t, _), _| *t != tenant);
    }

    async fn active_model(&self, id: Option<Uuid>) -> Result<Option<LlmModel>> {
        let Some(id) = id else { return Ok(None) };
        Ok(self.catalog.get_model(id).await?.filter(|m| m.is_active))
    }

    fn active_by_name<'a>(models: &'a [LlmModel], name: Option<&str>) -> Option<&'a LlmModel> {
        let name = name?;
        models.iter().find(|m| m.is_active && m.model_name == name)
    }

    /// Pick the model for a tenant without building a client.
    pub async fn select_model(
        &self,
        tenant: TenantId,
        task_type: Option<&str>,
        priority: RoutingPriority,
    ) -> Result<LlmModel> {
        let config = self.catalog.get_config(tenant).await?;

        if let Some(cfg) = &config {
            let rule = task_type.and_then(|t| cfg.routing_rules.get(t)).map(|r| r.model_id);
            for candidate in [rule, cfg.primary_model_id, cfg.fallback_model_id] {
                if let Some(model) = self.active_model(candidate).await? {
                    return Ok(model);
                }
            }
        }

        let models = self.catalog.list_models().await?;
        for name in [self.default_primary.as_deref(), self.default_fallback.as_deref()] {
            if let Some(model) = Self::active_by_name(&models, name) {
                return Ok(model.clone());
            }
        }

        let active: Vec<LlmModel> = models
            .into_iter()
            .filter(|m| m.is_active && self.factory.is_supported(&m.provider))
            .collect();
        rank_by_priority(active, priority)
            .ok_or_else(|| Error::configuration(format!("No active LLM model available for tenant {}", tenant)))
    }

    fn client_for(&self, tenant: TenantId, config: Option<&LlmConfig>, provider: &str) -> Result<Arc<dyn LlmClient>> {
        let cache_key = (tenant, provider.to_string());
        if let Some(client) = self.clients.get(&cache_key) {
            return Ok(client.clone());
        }

        let key = config
            .and_then(|c| c.provider_api_keys.get(provider))
            .map(|k| Secret::new(k.expose_secret().clone()))
            .ok_or_else(|| Error::configuration(format!("No API key configured for provider '{}'", provider)))?;
        let client = self.factory.create(provider, key)?;
        self.clients.insert(cache_key, client.clone());
        Ok(client)
    }
}

/// Choose from active models by routing priority.
///
/// Cost picks the cheapest total rate, quality the most expensive, speed the
/// cheapest output rate, balanced the median total rate.
pub fn rank_by_priority(mut models: Vec<LlmModel>, priority: RoutingPriority) -> Option<LlmModel> {
    if models.is_empty() {
        return None;
    }
    let total = |m: &LlmModel| m.input_cost_per_1k + m.output_cost_per_1k;
    match priority {
        RoutingPriority::Speed => {
            models.sort_by(|a, b| a.output_cost_per_1k.total_cmp(&b.output_cost_per_1k).then(a.model_name.cmp(&b.model_name)));
        }
        _ => {
            models.sort_by(|a, b| total(a).total_cmp(&total(b)).then(a.model_name.cmp(&b.model_name)));
        }
    }
    let idx = match priority {
        RoutingPriority::Cost | RoutingPriority::Speed => 0,
        RoutingPriority::Quality => models.len() - 1,
        RoutingPriority::Balanced => models.len() / 2,
    };
    Some(models.swap_remove(idx))
}

#[async_trait]
impl ModelResolver for ModelRouter {
    async fn resolve(
        &self,
        tenant_id: TenantId,
        task_type: Option<&str>,
        priority: RoutingPriority,
    ) -> Result<ResolvedModel> {
        let model = self.select_model(tenant_id, task_type, priority).await?;
        let config = self.catalog.get_config(tenant_id).await?;
        let client = self.client_for(tenant_id, config.as_ref(), &model.provider)?;

        tracing::debug!(
            tenant_id = %tenant_id,
            task_type = ?task_type,
            provider = %model.provider,
            model = %model.model_name,
            "Resolved model"
        );
        Ok(ResolvedModel { model, client })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_store::InMemoryLlmCatalog;

    struct Fixture {
        router: ModelRouter,
        catalog: Arc<InMemoryLlmCatalog>,
        cheap: LlmModel,
        mid: LlmModel,
        premium: LlmModel,
    }

    async fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryLlmCatalog::new());
        let cheap = LlmModel::new("openai", "gpt-4o-mini").with_rates(0.00015, 0.0006);
        let mid = LlmModel::new("deepseek", "deepseek-chat").with_rates(0.00027, 0.0011);
        let premium = LlmModel::new("anthropic", "claude-3-5-sonnet").with_rates(0.003, 0.015);
        for m in [&cheap, &mid, &premium] {
            catalog.upsert_model(m.clone()).await.unwrap();
        }
        let router = ModelRouter::new(catalog.clone(), LlmSettings::default()).unwrap();
        Fixture { router, catalog, cheap, mid, premium }
    }

    #[tokio::test]
    async fn test_rule_then_primary_then_fallback() {
        let f = fixture().await;
        let tenant = Uuid::new_v4();
        let inactive = LlmModel::new("openai", "gpt-old").inactive();
        f.catalog.upsert_model(inactive.clone()).await.unwrap();
        f.catalog
            .set_config(
                LlmConfig::new(tenant)
                    .with_rule("research", f.premium.id)
                    .with_rule("legacy", inactive.id)
                    .with_primary(f.mid.id)
                    .with_fallback(f.cheap.id),
            )
            .await
            .unwrap();

        let r = &f.router;
        let pick = |t: Option<&'static str>| r.select_model(tenant, t, RoutingPriority::Balanced);
        assert_eq!(pick(Some("research")).await.unwrap().id, f.premium.id);
        assert_eq!(pick(Some("legacy")).await.unwrap().id, f.mid.id);
        assert_eq!(pick(None).await.unwrap().id, f.mid.id);
    }

    #[tokio::test]
    async fn test_priority_fallback_without_tenant_config() {
        let f = fixture().await;
        let tenant = Uuid::new_v4();
        let r = &f.router;
        assert_eq!(r.select_model(tenant, None, RoutingPriority::Cost).await.unwrap().id, f.cheap.id);
        assert_eq!(r.select_model(tenant, None, RoutingPriority::Quality).await.unwrap().id, f.premium.id);
        assert_eq!(r.select_model(tenant, None, RoutingPriority::Balanced).await.unwrap().id, f.mid.id);
    }

    #[tokio::test]
    async fn test_resolve_requires_provider_key() {
        let f = fixture().await;
        let tenant = Uuid::new_v4();
        f.catalog
            .set_config(LlmConfig::new(tenant).with_primary(f.premium.id))
            .await
            .unwrap();
        let err = f.router.resolve(tenant, None, RoutingPriority::Balanced).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        f.catalog
            .set_config(
                LlmConfig::new(tenant)
                    .with_primary(f.premium.id)
                    .with_api_key("anthropic", "sk-ant"),
            )
            .await
            .unwrap();
        let resolved = f.router.resolve(tenant, None, RoutingPriority::Balanced).await.unwrap();
        assert_eq!(resolved.client.provider(), "anthropic");
        assert_eq!(resolved.model.model_name, "claude-3-5-sonnet");
    }
}
