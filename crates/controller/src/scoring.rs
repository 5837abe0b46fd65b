//! Rubric-driven entity scoring persisted on the knowledge graph.

use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    traits::KnowledgeGraph,
    types::{EntityScore, TenantId},
    Error, Result,
};

use crate::extractor::KnowledgeExtractor;
use crate::rubrics::RubricRegistry;

/// Relations described to the model per scoring call.
const MAX_RELATIONS_IN_PROMPT: usize = 20;

pub struct EntityScorer {
    graph: Arc<dyn KnowledgeGraph>,
    extractor: Arc<KnowledgeExtractor>,
    rubrics: Arc<RubricRegistry>,
}

impl EntityScorer {
    pub fn new(
        graph: Arc<dyn KnowledgeGraph>,
        extractor: Arc<KnowledgeExtractor>,
        rubrics: Arc<RubricRegistry>,
    ) -> Self {
        Self {
            graph,
            extractor,
            rubrics,
        }
    }

    /// Score an entity and persist `score`, `scored_at`, `scoring_rubric_id`
    /// and `properties.score_breakdown`. `None` when the entity is not in
    /// the tenant.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant))]
    pub async fn score_entity(&self, tenant: TenantId, entity_id: Uuid, rubric_id: &str) -> Result<Option<EntityScore>> {
        let rubric = self
            .rubrics
            .get(rubric_id)
            .ok_or_else(|| Error::validation(format!("unknown rubric '{}'", rubric_id)))?;

        let Some(view) = self.graph.get_entity(tenant, entity_id, true).await? else {
            return Ok(None);
        };

        let mut relations = Vec::new();
        for relation in view.relations.into_iter().take(MAX_RELATIONS_IN_PROMPT) {
            let Some(other) = relation.other_end(entity_id) else {
                continue;
            };
            let name = match self.graph.get_entity(tenant, other, false).await? {
                Some(o) => o.entity.name,
                None => other.to_string(),
            };
            relations.push((relation, name));
        }

        let score = self
            .extractor
            .apply_rubric(tenant, rubric, &view.entity, &relations)
            .await?;

        self.graph
            .record_score(tenant, entity_id, score.score, rubric_id, score.breakdown.clone())
            .await?;
        tracing::info!(entity = %view.entity.name, score = score.score, rubric = rubric_id, "Entity scored");
        Ok(Some(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::embedding::HashEmbedder;
    use orchestra_core::mocks::{MockLlm, StaticModelResolver};
    use orchestra_core::types::{NewEntity, NewRelation};
    use orchestra_store::InMemoryKnowledgeGraph;
    use serde_json::json;

    fn scorer(reply: &str) -> (EntityScorer, Arc<InMemoryKnowledgeGraph>, Arc<MockLlm>) {
        let graph = Arc::new(InMemoryKnowledgeGraph::new(Arc::new(HashEmbedder::new(64))));
        let llm = Arc::new(MockLlm::constant(reply));
        let extractor = Arc::new(KnowledgeExtractor::new(Arc::new(
            StaticModelResolver::with_client(llm.clone()),
        )));
        let rubrics = Arc::new(RubricRegistry::with_defaults().unwrap());
        (EntityScorer::new(graph.clone(), extractor, rubrics), graph, llm)
    }

    #[tokio::test]
    async fn test_scores_are_clamped_and_persisted() {
        let (scorer, graph, llm) = scorer(
            r#"{"score": 140, "breakdown": {"hiring": 40, "funding": 10, "bogus": 9}, "reasoning": "strong"}"#,
        );
        let tenant = Uuid::new_v4();
        let acme = graph
            .create_entity(tenant, NewEntity::new("Acme", "ai_company"))
            .await
            .unwrap();
        let globex = graph
            .create_entity(tenant, NewEntity::new("Globex", "ai_company"))
            .await
            .unwrap();
        graph
            .create_relation(tenant, NewRelation::new(acme.id, globex.id, "partners_with"))
            .await
            .unwrap();

        let score = scorer.score_entity(tenant, acme.id, "ai_lead").await.unwrap().unwrap();
        assert_eq!(score.score, 100);
        assert_eq!(score.breakdown["hiring"], json!(25));
        assert_eq!(score.breakdown["news"], json!(0));
        assert!(score.breakdown.get("bogus").is_none());

        let prompt = &llm.requests().await[0].messages[1].content;
        assert!(prompt.contains("partners_with -> Globex"));

        let stored = graph.get_entity(tenant, acme.id, false).await.unwrap().unwrap().entity;
        assert_eq!(stored.score, Some(100));
        assert_eq!(stored.scoring_rubric_id.as_deref(), Some("ai_lead"));
        assert!(stored.scored_at.is_some());
        assert_eq!(stored.properties["score_breakdown"]["hiring"], json!(25));
    }

    #[tokio::test]
    async fn test_unknown_rubric_and_entity() {
        let (scorer, _, _) = scorer("{}");
        let tenant = Uuid::new_v4();
        assert!(matches!(
            scorer.score_entity(tenant, Uuid::new_v4(), "nope").await.unwrap_err(),
            Error::Validation(_)
        ));
        assert!(scorer
            .score_entity(tenant, Uuid::new_v4(), "ai_lead")
            .await
            .unwrap()
            .is_none());
    }
}
