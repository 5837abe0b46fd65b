//! Bootstrap data loaded from a YAML seed file.
//!
//! A seed lists tenants with their agents, groups, agent kits, skill
//! configs, gateway instance and model routing. Agents are referenced by
//! name inside a tenant block; models by `model_name`. Loading is an upsert:
//! rows with an explicit `id` replace earlier copies.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    traits::{AgentDirectory, ChatStore, LlmCatalog, SkillCatalog},
    types::{
        Agent, AgentGroup, AgentKit, AgentRelationship, AgentSkill, AutonomyLevel, InstanceStatus, LlmConfig,
        RelationshipType, SkillConfig, TenantId, TenantInstance,
    },
    Error, Result,
};

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    tenants: Vec<TenantSeed>,
}

#[derive(Debug, Deserialize)]
struct TenantSeed {
    id: TenantId,
    #[serde(default)]
    agents: Vec<AgentSeed>,
    #[serde(default)]
    groups: Vec<GroupSeed>,
    #[serde(default)]
    agent_kits: Vec<KitSeed>,
    #[serde(default)]
    skill_configs: Vec<SkillSeed>,
    gateway_url: Option<String>,
    llm: Option<LlmSeed>,
}

#[derive(Debug, Deserialize)]
struct AgentSeed {
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    capabilities: Vec<String>,
    personality: Option<String>,
    #[serde(default)]
    autonomy_level: AutonomyLevel,
    max_delegation_depth: Option<u32>,
    /// Task types to start proficiency rows for.
    #[serde(default)]
    skills: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupSeed {
    id: Option<Uuid>,
    name: String,
    goal: Option<String>,
    #[serde(default)]
    relationships: Vec<RelationshipSeed>,
}

#[derive(Debug, Deserialize)]
struct RelationshipSeed {
    from: String,
    to: String,
    #[serde(rename = "type")]
    relationship_type: RelationshipType,
}

#[derive(Debug, Deserialize)]
struct KitSeed {
    id: Option<Uuid>,
    name: String,
    agents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SkillSeed {
    skill_name: String,
    #[serde(default = "enabled_default")]
    enabled: bool,
    #[serde(default)]
    requires_approval: bool,
    rate_limit: Option<u32>,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct LlmSeed {
    primary_model: Option<String>,
    fallback_model: Option<String>,
    /// Task type to model name.
    #[serde(default)]
    routing_rules: HashMap<String, String>,
    #[serde(default)]
    api_keys: HashMap<String, String>,
}

/// Row counts written by one seed load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub tenants: usize,
    pub agents: usize,
    pub groups: usize,
    pub agent_kits: usize,
    pub skill_configs: usize,
    pub instances: usize,
    pub llm_configs: usize,
}

pub struct Seeder {
    directory: Arc<dyn AgentDirectory>,
    chat: Arc<dyn ChatStore>,
    skills: Arc<dyn SkillCatalog>,
    models: Arc<dyn LlmCatalog>,
    instance_type: String,
}

impl Seeder {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        chat: Arc<dyn ChatStore>,
        skills: Arc<dyn SkillCatalog>,
        models: Arc<dyn LlmCatalog>,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            chat,
            skills,
            models,
            instance_type: instance_type.into(),
        }
    }

    pub async fn load_file(&self, path: &str) -> Result<SeedReport> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::configuration(format!("Failed to read seed file {}: {}", path, e)))?;
        let report = self.load_yaml(&yaml).await?;
        tracing::info!(path, tenants = report.tenants, agents = report.agents, "Seed loaded");
        Ok(report)
    }

    pub async fn load_yaml(&self, yaml: &str) -> Result<SeedReport> {
        let file: SeedFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::configuration(format!("Failed to parse seed YAML: {}", e)))?;
        let mut report = SeedReport::default();
        for tenant in file.tenants {
            self.load_tenant(tenant, &mut report).await?;
            report.tenants += 1;
        }
        Ok(report)
    }

    async fn load_tenant(&self, seed: TenantSeed, report: &mut SeedReport) -> Result<()> {
        let tenant = seed.id;
        let mut by_name: HashMap<String, Uuid> = HashMap::new();

        for a in seed.agents {
            let mut agent = Agent::new(tenant, a.name.clone())
                .with_role(a.role)
                .with_capabilities(a.capabilities)
                .with_autonomy(a.autonomy_level);
            if let Some(id) = a.id {
                agent.id = id;
            }
            if let Some(p) = a.personality {
                agent = agent.with_personality(p);
            }
            if let Some(depth) = a.max_delegation_depth {
                agent = agent.with_max_delegation_depth(depth);
            }
            for skill in &a.skills {
                if self.directory.get_skill(tenant, agent.id, skill).await?.is_none() {
                    self.directory
                        .upsert_skill(AgentSkill::new(tenant, agent.id, skill.clone()))
                        .await?;
                }
            }
            if by_name.insert(a.name.clone(), agent.id).is_some() {
                return Err(Error::configuration(format!(
                    "seed tenant {} declares agent '{}' twice",
                    tenant, a.name
                )));
            }
            self.directory.upsert_agent(agent).await?;
            report.agents += 1;
        }

        let lookup = |name: &str| {
            by_name.get(name).copied().ok_or_else(|| {
                Error::configuration(format!("seed tenant {} references unknown agent '{}'", tenant, name))
            })
        };

        for g in seed.groups {
            let mut group = AgentGroup::new(tenant, g.name);
            if let Some(id) = g.id {
                group.id = id;
            }
            if let Some(goal) = g.goal {
                group = group.with_goal(goal);
            }
            let group_id = group.id;
            self.directory.create_group(group).await?;
            for rel in g.relationships {
                let (from, to) = (lookup(&rel.from)?, lookup(&rel.to)?);
                self.directory
                    .add_relationship(AgentRelationship::new(tenant, group_id, from, to, rel.relationship_type))
                    .await?;
            }
            report.groups += 1;
        }

        for k in seed.agent_kits {
            let agent_ids = k.agents.iter().map(|n| lookup(n)).collect::<Result<Vec<_>>>()?;
            self.chat
                .upsert_agent_kit(AgentKit {
                    id: k.id.unwrap_or_else(Uuid::new_v4),
                    tenant_id: tenant,
                    name: k.name,
                    agent_ids,
                })
                .await?;
            report.agent_kits += 1;
        }

        for s in seed.skill_configs {
            let mut config = SkillConfig::new(tenant, s.skill_name);
            config.enabled = s.enabled;
            config.requires_approval = s.requires_approval;
            config.rate_limit = s.rate_limit;
            self.skills.upsert_config(config).await?;
            report.skill_configs += 1;
        }

        if let Some(url) = seed.gateway_url {
            self.skills
                .upsert_instance(TenantInstance::new(
                    tenant,
                    self.instance_type.clone(),
                    InstanceStatus::Running,
                    url,
                ))
                .await?;
            report.instances += 1;
        }

        if let Some(llm) = seed.llm {
            self.models.set_config(self.llm_config(tenant, llm).await?).await?;
            report.llm_configs += 1;
        }
        Ok(())
    }

    async fn llm_config(&self, tenant: TenantId, seed: LlmSeed) -> Result<LlmConfig> {
        let models: HashMap<String, Uuid> = self
            .models
            .list_models()
            .await?
            .into_iter()
            .map(|m| (m.model_name, m.id))
            .collect();
        let model = |name: &str| {
            models
                .get(name)
                .copied()
                .ok_or_else(|| Error::configuration(format!("seed references unknown model '{}'", name)))
        };

        let mut config = LlmConfig::new(tenant);
        if let Some(name) = &seed.primary_model {
            config = config.with_primary(model(name)?);
        }
        if let Some(name) = &seed.fallback_model {
            config = config.with_fallback(model(name)?);
        }
        for (task_type, name) in &seed.routing_rules {
            config = config.with_rule(task_type.clone(), model(name)?);
        }
        for (provider, key) in seed.api_keys {
            config = config.with_api_key(provider, key);
        }
        Ok(config)
    }
}
