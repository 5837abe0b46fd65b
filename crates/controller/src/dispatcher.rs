//! Capability-based agent selection within a group.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    traits::AgentDirectory,
    types::{Agent, RelationshipType, TenantId},
    Result,
};

/// A candidate agent and its capability match in [0, 1].
#[derive(Debug, Clone)]
pub struct ScoredAgent {
    pub agent: Agent,
    pub score: f64,
}

/// Fraction of `required` the agent covers. 1.0 when nothing is required.
pub fn capability_score(agent: &Agent, required: &[String]) -> f64 {
    let required: HashSet<&str> = required.iter().map(String::as_str).collect();
    if required.is_empty() {
        return 1.0;
    }
    let matched = agent
        .capabilities
        .iter()
        .filter(|c| required.contains(c.as_str()))
        .collect::<HashSet<_>>()
        .len();
    matched as f64 / required.len() as f64
}

/// Highest scorer; ties go to the lexicographically smaller name, then id.
pub fn pick_best(candidates: Vec<Agent>, required: &[String]) -> Option<ScoredAgent> {
    candidates
        .into_iter()
        .map(|agent| ScoredAgent {
            score: capability_score(&agent, required),
            agent,
        })
        .min_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.agent.name.cmp(&b.agent.name))
                .then_with(|| a.agent.id.cmp(&b.agent.id))
        })
}

pub struct AgentDispatcher {
    directory: Arc<dyn AgentDirectory>,
}

impl AgentDispatcher {
    pub fn new(directory: Arc<dyn AgentDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn AgentDirectory> {
        &self.directory
    }

    /// Best agent of `group` for `required`, skipping `exclude`.
    #[tracing::instrument(skip(self, exclude), fields(tenant_id = %tenant))]
    pub async fn find_best_agent(
        &self,
        tenant: TenantId,
        group: Uuid,
        required: &[String],
        exclude: &HashSet<Uuid>,
    ) -> Result<Option<ScoredAgent>> {
        let members: BTreeSet<Uuid> = self
            .directory
            .list_relationships(tenant, group)
            .await?
            .into_iter()
            .flat_map(|r| [r.from_agent_id, r.to_agent_id])
            .filter(|id| !exclude.contains(id))
            .collect();

        let mut candidates = Vec::with_capacity(members.len());
        for id in members {
            if let Some(agent) = self.directory.get_agent(tenant, id).await? {
                candidates.push(agent);
            }
        }

        let best = pick_best(candidates, required);
        if let Some(ref b) = best {
            tracing::debug!(agent = %b.agent.name, score = b.score, "Dispatcher selected agent");
        }
        Ok(best)
    }

    /// The agent that `supervises` `agent` in `group`, if any.
    pub async fn get_supervisor(&self, tenant: TenantId, agent: Uuid, group: Uuid) -> Result<Option<Agent>> {
        let supervisor = self
            .directory
            .list_relationships(tenant, group)
            .await?
            .into_iter()
            .find(|r| r.relationship_type == RelationshipType::Supervises && r.to_agent_id == agent)
            .map(|r| r.from_agent_id);
        match supervisor {
            Some(id) => self.directory.get_agent(tenant, id).await,
            None => Ok(None),
        }
    }

    /// Agents directly supervised by `agent` in `group`.
    pub async fn get_subordinates(&self, tenant: TenantId, agent: Uuid, group: Uuid) -> Result<Vec<Agent>> {
        let ids: BTreeSet<Uuid> = self
            .directory
            .list_relationships(tenant, group)
            .await?
            .into_iter()
            .filter(|r| r.relationship_type == RelationshipType::Supervises && r.from_agent_id == agent)
            .map(|r| r.to_agent_id)
            .collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(a) = self.directory.get_agent(tenant, id).await? {
                out.push(a);
            }
        }
        Ok(out)
    }

    /// True iff a `supervises` or `delegates_to` edge runs `from -> to` in `group`.
    pub async fn can_delegate(&self, tenant: TenantId, from: Uuid, to: Uuid, group: Uuid) -> Result<bool> {
        Ok(self
            .directory
            .list_relationships(tenant, group)
            .await?
            .iter()
            .any(|r| {
                r.from_agent_id == from
                    && r.to_agent_id == to
                    && matches!(
                        r.relationship_type,
                        RelationshipType::Supervises | RelationshipType::DelegatesTo
                    )
            }))
    }

    /// Every agent `from` may hand work to, optionally limited to one group.
    pub async fn delegation_targets(
        &self,
        tenant: TenantId,
        from: Uuid,
        group: Option<Uuid>,
    ) -> Result<Vec<Agent>> {
        let ids: BTreeSet<Uuid> = self
            .directory
            .relationships_of(tenant, from)
            .await?
            .into_iter()
            .filter(|r| {
                r.from_agent_id == from
                    && group.map_or(true, |g| r.group_id == g)
                    && matches!(
                        r.relationship_type,
                        RelationshipType::Supervises | RelationshipType::DelegatesTo
                    )
            })
            .map(|r| r.to_agent_id)
            .collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(a) = self.directory.get_agent(tenant, id).await? {
                out.push(a);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::types::{AgentGroup, AgentRelationship};
    use orchestra_store::InMemoryAgentDirectory;

    struct Org {
        dispatcher: AgentDispatcher,
        tenant: TenantId,
        group: Uuid,
        lead: Agent,
        analyst: Agent,
        writer: Agent,
    }

    async fn org() -> Org {
        let dir = Arc::new(InMemoryAgentDirectory::new());
        let tenant = Uuid::new_v4();
        let group = AgentGroup::new(tenant, "research");
        dir.create_group(group.clone()).await.unwrap();

        let lead = Agent::new(tenant, "lead").with_capabilities(["planning"]);
        let analyst = Agent::new(tenant, "analyst").with_capabilities(["sql"]);
        let writer = Agent::new(tenant, "writer").with_capabilities(["writing"]);
        for a in [&lead, &analyst, &writer] {
            dir.upsert_agent(a.clone()).await.unwrap();
        }
        for (from, to, ty) in [
            (&lead, &analyst, RelationshipType::Supervises),
            (&lead, &writer, RelationshipType::Supervises),
            (&analyst, &writer, RelationshipType::CollaboratesWith),
        ] {
            dir.add_relationship(AgentRelationship::new(tenant, group.id, from.id, to.id, ty))
                .await
                .unwrap();
        }

        Org {
            dispatcher: AgentDispatcher::new(dir),
            tenant,
            group: group.id,
            lead,
            analyst,
            writer,
        }
    }

    #[test]
    fn test_capability_score() {
        let agent = Agent::new(Uuid::new_v4(), "a").with_capabilities(["sql", "reporting"]);
        assert_eq!(capability_score(&agent, &[]), 1.0);
        assert_eq!(capability_score(&agent, &["sql".into(), "writing".into()]), 0.5);
    }

    #[test]
    fn test_ties_break_by_name() {
        let tenant = Uuid::new_v4();
        let best = pick_best(
            vec![Agent::new(tenant, "zed"), Agent::new(tenant, "amy")],
            &["sql".into()],
        )
        .unwrap();
        assert_eq!(best.agent.name, "amy");
        assert_eq!(best.score, 0.0);
    }

    #[tokio::test]
    async fn test_find_best_with_exclusions() {
        let o = org().await;
        let need = vec!["sql".to_string()];

        let best = o
            .dispatcher
            .find_best_agent(o.tenant, o.group, &need, &HashSet::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.agent.id, o.analyst.id);

        let all: HashSet<Uuid> = [o.lead.id, o.analyst.id, o.writer.id].into();
        assert!(o
            .dispatcher
            .find_best_agent(o.tenant, o.group, &need, &all)
            .await
            .unwrap()
            .is_none());

        // Another tenant sees nothing.
        assert!(o
            .dispatcher
            .find_best_agent(Uuid::new_v4(), o.group, &need, &HashSet::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_hierarchy_lookups() {
        let o = org().await;
        let sup = o
            .dispatcher
            .get_supervisor(o.tenant, o.analyst.id, o.group)
            .await
            .unwrap();
        assert_eq!(sup.map(|a| a.id), Some(o.lead.id));

        let subs = o
            .dispatcher
            .get_subordinates(o.tenant, o.lead.id, o.group)
            .await
            .unwrap();
        assert_eq!(subs.len(), 2);

        assert!(o.dispatcher.can_delegate(o.tenant, o.lead.id, o.writer.id, o.group).await.unwrap());
        assert!(!o.dispatcher.can_delegate(o.tenant, o.analyst.id, o.writer.id, o.group).await.unwrap());

        let targets = o
            .dispatcher
            .delegation_targets(o.tenant, o.lead.id, None)
            .await
            .unwrap();
        assert_eq!(targets.len(), 2);
    }
}
