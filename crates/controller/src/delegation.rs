//! Delegation of work to subordinate agents from inside the tool loop.
//!
//! The parent task sits in `delegated` while its child runs the full
//! pipeline, then returns to `executing`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use orchestra_core::{
    text::preview,
    traits::Tool,
    types::{StepType, Task, TaskStatus, TenantId, ToolOutput},
    Error, Result,
};

use crate::dispatcher::pick_best;
use crate::pipeline::TaskPipeline;

pub const DELEGATE_TOOL_NAME: &str = "delegate_task";

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    objective: String,
    #[serde(default)]
    target_agent_id: Option<Uuid>,
    #[serde(default)]
    required_capabilities: Vec<String>,
}

pub struct DelegateTaskTool {
    pipeline: TaskPipeline,
    tenant: TenantId,
    parent_task_id: Uuid,
    agent_id: Uuid,
}

impl DelegateTaskTool {
    pub fn new(pipeline: TaskPipeline, tenant: TenantId, parent_task_id: Uuid, agent_id: Uuid) -> Self {
        Self {
            pipeline,
            tenant,
            parent_task_id,
            agent_id,
        }
    }

    async fn set_parent_status(&self, from: TaskStatus, to: TaskStatus) -> Result<()> {
        let mut parent = self.pipeline.load(self.tenant, self.parent_task_id).await?;
        if parent.status == from {
            parent.status = to;
            self.pipeline.deps().tasks.update_unless_failed(&parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for DelegateTaskTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Hand a sub-task to an agent you supervise or delegate to, and wait for its result"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "objective": { "type": "string", "description": "What the other agent should do" },
                "target_agent_id": { "type": "string", "format": "uuid" },
                "required_capabilities": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["objective"]
        })
    }

    fn validate_params(&self, args: &Value) -> Result<()> {
        let objective = args.get("objective").and_then(Value::as_str).unwrap_or_default();
        if objective.trim().is_empty() {
            return Err(Error::validation("delegate_task needs a non-empty objective"));
        }
        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let args: DelegateArgs = serde_json::from_value(args)
            .map_err(|e| Error::tool_execution(format!("invalid delegate_task arguments: {}", e)))?;
        let deps = self.pipeline.deps();

        let parent = self.pipeline.load(self.tenant, self.parent_task_id).await?;
        let Some(agent) = deps.directory.get_agent(self.tenant, self.agent_id).await? else {
            return Ok(ToolOutput::error("Delegating agent no longer exists"));
        };
        let depth = parent.delegation_depth();
        if depth >= agent.max_delegation_depth {
            return Ok(ToolOutput::error(format!(
                "Delegation depth limit of {} reached",
                agent.max_delegation_depth
            )));
        }

        let targets = deps
            .dispatcher
            .delegation_targets(self.tenant, agent.id, parent.group_id)
            .await?;
        let target = match args.target_agent_id {
            Some(id) => {
                let allowed = match parent.group_id {
                    Some(group) => deps.dispatcher.can_delegate(self.tenant, agent.id, id, group).await?,
                    None => targets.iter().any(|a| a.id == id),
                };
                if !allowed {
                    return Ok(ToolOutput::error(format!("Not allowed to delegate to agent {}", id)));
                }
                targets.into_iter().find(|a| a.id == id)
            }
            None => pick_best(targets, &args.required_capabilities).map(|s| s.agent),
        };
        let Some(target) = target else {
            return Ok(ToolOutput::error("No agent available to delegate to"));
        };

        let mut child = Task::new(self.tenant, parent.task_type.clone(), args.objective.clone())
            .with_parent(parent.id)
            .with_agent(target.id)
            .with_priority(parent.priority)
            .with_context(json!({
                "delegation_depth": depth + 1,
                "delegated_by": agent.id,
                "required_capabilities": args.required_capabilities,
            }));
        if let Some(group) = parent.group_id {
            child = child.with_group(group);
        }
        let child = deps.tasks.create(child).await?;

        self.set_parent_status(TaskStatus::Executing, TaskStatus::Delegated).await?;
        deps.traces
            .record(
                self.tenant,
                parent.id,
                StepType::Delegated,
                Some(agent.id),
                json!({
                    "child_task_id": child.id,
                    "to_agent": target.name,
                    "objective": preview(&args.objective, 300),
                }),
                None,
            )
            .await?;
        tracing::info!(parent = %parent.id, child = %child.id, to = %target.name, "Delegating task");

        let finished = self.pipeline.run(self.tenant, child.id).await;
        self.set_parent_status(TaskStatus::Delegated, TaskStatus::Executing).await?;
        let finished = finished?;

        Ok(match finished.status {
            TaskStatus::Failed => ToolOutput::error(format!(
                "Delegated task failed: {}",
                finished.error.as_deref().unwrap_or("unknown error")
            )),
            TaskStatus::Reviewing => ToolOutput::text(format!(
                "{} finished; the result is awaiting review: {}",
                target.name,
                finished.output.as_deref().unwrap_or_default()
            )),
            _ => ToolOutput::text(format!(
                "{} reports: {}",
                target.name,
                finished.output.as_deref().unwrap_or_default()
            )),
        })
    }
}
