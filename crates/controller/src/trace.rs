//! Trace recorder: the single write path for execution trace rows.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    traits::TraceStore,
    types::{ExecutionTrace, NewTrace, StepType, TenantId},
    Result,
};
use orchestra_governance::sanitize_details;

/// Appends sanitised trace rows. The store assigns `step_order`.
#[derive(Clone)]
pub struct TraceRecorder {
    store: Arc<dyn TraceStore>,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    pub async fn record(
        &self,
        tenant: TenantId,
        task_id: Uuid,
        step: StepType,
        agent_id: Option<Uuid>,
        details: Value,
        duration_ms: Option<u64>,
    ) -> Result<ExecutionTrace> {
        let mut trace = NewTrace::new(task_id, step)
            .with_agent(agent_id)
            .with_details(sanitize_details(details));
        if let Some(ms) = duration_ms {
            trace = trace.with_duration_ms(ms);
        }
        let row = self.store.append(tenant, trace).await?;
        tracing::debug!(
            task_id = %task_id,
            step = step.as_str(),
            step_order = row.step_order,
            "Trace recorded"
        );
        Ok(row)
    }

    /// Record, logging instead of failing. For auxiliary rows only.
    pub async fn record_lossy(
        &self,
        tenant: TenantId,
        task_id: Uuid,
        step: StepType,
        agent_id: Option<Uuid>,
        details: Value,
        duration_ms: Option<u64>,
    ) {
        if let Err(e) = self
            .record(tenant, task_id, step, agent_id, details, duration_ms)
            .await
        {
            tracing::warn!(task_id = %task_id, step = step.as_str(), error = %e, "Failed to record trace");
        }
    }

    pub async fn list(&self, tenant: TenantId, task_id: Uuid) -> Result<Vec<ExecutionTrace>> {
        self.store.list(tenant, task_id).await
    }

    pub async fn has_step(&self, tenant: TenantId, task_id: Uuid, step: StepType) -> Result<bool> {
        Ok(self
            .store
            .list(tenant, task_id)
            .await?
            .iter()
            .any(|t| t.step_type == step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::text::PREVIEW_CHARS;
    use orchestra_store::InMemoryTraceStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_rows_are_ordered_and_sanitised() {
        let recorder = TraceRecorder::new(Arc::new(InMemoryTraceStore::new()));
        let tenant = Uuid::new_v4();
        let task = Uuid::new_v4();

        recorder
            .record(tenant, task, StepType::Dispatched, None, json!({}), None)
            .await
            .unwrap();
        recorder
            .record(
                tenant,
                task,
                StepType::SkillCall,
                None,
                json!({"api_key": "sk-secret", "input": "x".repeat(2000)}),
                Some(12),
            )
            .await
            .unwrap();

        let rows = recorder.list(tenant, task).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].step_order < rows[1].step_order);
        assert_ne!(rows[1].details["api_key"], "sk-secret");
        assert_eq!(rows[1].details["input"].as_str().unwrap().len(), PREVIEW_CHARS);
        assert_eq!(rows[1].duration_ms, Some(12));
        assert!(recorder.has_step(tenant, task, StepType::Dispatched).await.unwrap());
        assert!(!recorder.has_step(tenant, task, StepType::Completed).await.unwrap());
    }
}
