//! Skill configs, tenant gateway instances and the LLM catalogue.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use orchestra_core::{
    traits::{LlmCatalog, SkillCatalog},
    types::{InstanceStatus, LlmConfig, LlmModel, SkillConfig, TenantId, TenantInstance},
    Result,
};

#[derive(Default)]
pub struct InMemorySkillCatalog {
    configs: DashMap<(TenantId, String), SkillConfig>,
    instances: DashMap<Uuid, TenantInstance>,
}

impl InMemorySkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SkillCatalog for InMemorySkillCatalog {
    async fn upsert_config(&self, config: SkillConfig) -> Result<()> {
        self.configs
            .insert((config.tenant_id, config.skill_name.clone()), config);
        Ok(())
    }

    async fn get_config(&self, tenant: TenantId, skill_name: &str) -> Result<Option<SkillConfig>> {
        Ok(self
            .configs
            .get(&(tenant, skill_name.to_string()))
            .map(|c| c.clone()))
    }

    async fn list_configs(&self, tenant: TenantId) -> Result<Vec<SkillConfig>> {
        let mut configs: Vec<SkillConfig> = self
            .configs
            .iter()
            .filter(|c| c.tenant_id == tenant)
            .map(|c| c.clone())
            .collect();
        configs.sort_by(|a, b| a.skill_name.cmp(&b.skill_name));
        Ok(configs)
    }

    async fn upsert_instance(&self, instance: TenantInstance) -> Result<()> {
        self.instances.insert(instance.id, instance);
        Ok(())
    }

    async fn running_instance(&self, tenant: TenantId, instance_type: &str) -> Result<Option<TenantInstance>> {
        Ok(self
            .instances
            .iter()
            .find(|i| {
                i.tenant_id == tenant
                    && i.instance_type == instance_type
                    && i.status == InstanceStatus::Running
            })
            .map(|i| i.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryLlmCatalog {
    models: DashMap<Uuid, LlmModel>,
    configs: DashMap<TenantId, LlmConfig>,
}

impl InMemoryLlmCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LlmCatalog for InMemoryLlmCatalog {
    async fn upsert_model(&self, model: LlmModel) -> Result<()> {
        self.models.insert(model.id, model);
        Ok(())
    }

    async fn get_model(&self, id: Uuid) -> Result<Option<LlmModel>> {
        Ok(self.models.get(&id).map(|m| m.clone()))
    }

    async fn list_models(&self) -> Result<Vec<LlmModel>> {
        let mut models: Vec<LlmModel> = self.models.iter().map(|m| m.clone()).collect();
        models.sort_by(|a, b| a.model_name.cmp(&b.model_name));
        Ok(models)
    }

    async fn set_config(&self, config: LlmConfig) -> Result<()> {
        self.configs.insert(config.tenant_id, config);
        Ok(())
    }

    async fn get_config(&self, tenant: TenantId) -> Result<Option<LlmConfig>> {
        Ok(self.configs.get(&tenant).map(|c| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_running_instance_ignores_other_states() {
        let catalog = InMemorySkillCatalog::new();
        let tenant = Uuid::new_v4();
        catalog
            .upsert_instance(TenantInstance::new(
                tenant,
                "openclaw",
                InstanceStatus::Provisioning,
                "http://a",
            ))
            .await
            .unwrap();
        assert!(catalog.running_instance(tenant, "openclaw").await.unwrap().is_none());

        catalog
            .upsert_instance(TenantInstance::new(tenant, "openclaw", InstanceStatus::Running, "http://b"))
            .await
            .unwrap();
        let found = catalog.running_instance(tenant, "openclaw").await.unwrap().unwrap();
        assert_eq!(found.internal_url, "http://b");
        assert!(catalog
            .running_instance(Uuid::new_v4(), "openclaw")
            .await
            .unwrap()
            .is_none());
    }
}
