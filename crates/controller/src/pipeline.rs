//! Task execution pipeline.
//!
//! Five ordered activities per task: dispatch, memory recall, execute,
//! entity persist, evaluate. A task already marked `failed` is a sentinel:
//! no later activity overwrites it.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use orchestra_core::{
    config::PipelineConfig,
    text::preview,
    traits::{AgentDirectory, KnowledgeGraph, MemoryStore, SkillCatalog, TaskStore, ToolRegistry},
    types::{
        Agent, AutonomyLevel, MemoryQuery, MemoryType, NewMemory, RoutingPriority, StepType, Task,
        TaskPriority, TaskStatus, TenantId,
    },
    Error, Result,
};
use orchestra_governance::{track_step, track_task, EntityValidator, ValidationPolicy};
use orchestra_skills::{CallContext, GatewaySkillTool, InMemoryToolRegistry, SkillRouter};

use crate::delegation::DelegateTaskTool;
use crate::dispatcher::AgentDispatcher;
use crate::extractor::{ContentType, KnowledgeExtractor};
use crate::invoker::{Invocation, InvokeRequest};
use crate::rubrics::RubricRegistry;
use crate::runtime::{AgentRuntime, RuntimeRequest};
use crate::scoring::EntityScorer;
use crate::trace::TraceRecorder;
use crate::workflow::{RetryPolicy, WorkflowEngine};

pub const NO_AGENT_ERROR: &str = "No suitable agent found";

const RECALL_LIMIT: usize = 5;
const RECALL_MIN_IMPORTANCE: f64 = 0.3;

const NOMINAL_CONFIDENCE: f64 = 0.9;
const TOOL_ERROR_PENALTY: f64 = 0.1;
const MIN_SUCCESS_CONFIDENCE: f64 = 0.3;
const FAILED_CONFIDENCE: f64 = 0.2;

/// Everything the pipeline talks to. Built by `PipelineBuilder`.
pub struct PipelineDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub directory: Arc<dyn AgentDirectory>,
    pub memory: Arc<dyn MemoryStore>,
    pub graph: Arc<dyn KnowledgeGraph>,
    pub catalog: Arc<dyn SkillCatalog>,
    pub skill_router: Option<Arc<SkillRouter>>,
    pub builtins: Arc<InMemoryToolRegistry>,
    pub runtime: Arc<dyn AgentRuntime>,
    pub extractor: Arc<KnowledgeExtractor>,
    pub validator: EntityValidator,
    pub validation: ValidationPolicy,
    pub dispatcher: AgentDispatcher,
    pub traces: TraceRecorder,
    pub engine: Arc<WorkflowEngine>,
    pub config: PipelineConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistSummary {
    pub candidates: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub duplicates_skipped: usize,
    pub created: usize,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct TaskPipeline {
    deps: Arc<PipelineDeps>,
}

fn set_context(task: &mut Task, key: &str, value: Value) {
    if !task.context.is_object() {
        task.context = json!({});
    }
    if let Some(obj) = task.context.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
}

fn routing_priority(priority: TaskPriority) -> RoutingPriority {
    match priority {
        TaskPriority::Critical | TaskPriority::High => RoutingPriority::Quality,
        TaskPriority::Normal => RoutingPriority::Balanced,
        TaskPriority::Low | TaskPriority::Background => RoutingPriority::Cost,
    }
}

/// Confidence for a finished run: nominal minus a penalty per tool error.
pub fn confidence_for(succeeded: bool, tool_errors: usize) -> f64 {
    if !succeeded {
        return FAILED_CONFIDENCE;
    }
    (NOMINAL_CONFIDENCE - TOOL_ERROR_PENALTY * tool_errors as f64).max(MIN_SUCCESS_CONFIDENCE)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

impl TaskPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps: Arc::new(deps) }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    pub fn traces(&self) -> &TraceRecorder {
        &self.deps.traces
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.deps.engine
    }

    /// Entity scorer over this pipeline's graph and extractor.
    pub fn scorer(&self, rubrics: Arc<RubricRegistry>) -> EntityScorer {
        EntityScorer::new(self.deps.graph.clone(), self.deps.extractor.clone(), rubrics)
    }

    pub async fn load(&self, tenant: TenantId, task_id: Uuid) -> Result<Task> {
        self.deps
            .tasks
            .get(tenant, task_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("task {}", task_id)))
    }

    /// Run every step for `task_id`. Terminal and reviewing tasks come back
    /// untouched. Handled failures end as a `failed` task, not an `Err`.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant, task_id = %task_id))]
    pub async fn run(&self, tenant: TenantId, task_id: Uuid) -> Result<Task> {
        let mut task = self.load(tenant, task_id).await?;
        if task.status.is_terminal() || task.status == TaskStatus::Reviewing {
            return Ok(task);
        }

        let _running = self.deps.engine.start();
        if task.status == TaskStatus::Queued {
            task.status = TaskStatus::Thinking;
        }
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        if !self.deps.tasks.update_unless_failed(&task).await? {
            return self.load(tenant, task_id).await;
        }

        // 1. Dispatch
        let agent = match self.dispatch(&task).await {
            Ok(Some(agent)) => agent,
            Ok(None) => return self.fail(tenant, task_id, None, NO_AGENT_ERROR).await,
            Err(e) => return self.fail(tenant, task_id, None, &e.to_string()).await,
        };

        // 2. Memory recall
        let fragment = self.recall(&task, &agent).await;

        // 3. Execute
        let mut task = self.refresh(tenant, task_id).await?;
        task.status = TaskStatus::Executing;
        if !self.deps.tasks.update_unless_failed(&task).await? {
            return self.load(tenant, task_id).await;
        }
        let outcome = self.execute(&task, &agent, fragment).await;

        let mut task = self.refresh(tenant, task_id).await?;
        if task.status == TaskStatus::Failed {
            tracing::info!("Task failed out-of-band during execute, leaving it");
            return Ok(task);
        }
        if let Ok(inv) = &outcome {
            task.output = Some(inv.reply.clone());
            task.tokens_used += inv.usage.total_tokens();
            task.cost += inv.usage.cost;
            if let Some(session) = &inv.runtime_session_id {
                set_context(&mut task, "runtime_session_id", Value::String(session.clone()));
            }
            if !self.deps.tasks.update_unless_failed(&task).await? {
                return self.load(tenant, task_id).await;
            }
        }

        // 4. Persist entities
        let persisted = self.persist(&task, &agent, outcome.as_ref().ok()).await;
        if persisted.created > 0 {
            let mut task = self.refresh(tenant, task_id).await?;
            set_context(&mut task, "entities_created", json!(persisted.created));
            self.deps.tasks.update_unless_failed(&task).await?;
        }

        // 5. Evaluate
        self.evaluate(tenant, task_id, &agent, outcome, &persisted).await
    }

    /// Approve a task waiting in `reviewing`.
    pub async fn approve_task(&self, tenant: TenantId, task_id: Uuid, user: Uuid) -> Result<Task> {
        let mut task = self.load(tenant, task_id).await?;
        if task.status != TaskStatus::Reviewing {
            return Err(Error::validation(format!(
                "task {} is {}, not awaiting review",
                task_id, task.status
            )));
        }
        task.approved_by = Some(user);
        task.finish(TaskStatus::Completed);
        self.deps.tasks.update(&task).await?;
        self.deps
            .traces
            .record(
                tenant,
                task_id,
                StepType::Approved,
                task.assigned_agent_id,
                json!({ "approved_by": user }),
                None,
            )
            .await?;
        track_task(&task.task_type, task.status.as_str());
        tracing::info!(task_id = %task_id, user = %user, "Task approved");
        Ok(task)
    }

    /// Reject a task waiting in `reviewing`; it ends `failed`.
    pub async fn reject_task(&self, tenant: TenantId, task_id: Uuid, user: Uuid, reason: Option<&str>) -> Result<Task> {
        let mut task = self.load(tenant, task_id).await?;
        if task.status != TaskStatus::Reviewing {
            return Err(Error::validation(format!(
                "task {} is {}, not awaiting review",
                task_id, task.status
            )));
        }
        task.error = Some(reason.unwrap_or("Rejected by reviewer").to_string());
        task.finish(TaskStatus::Failed);
        self.deps.tasks.update(&task).await?;
        self.deps
            .traces
            .record(
                tenant,
                task_id,
                StepType::Failed,
                task.assigned_agent_id,
                json!({ "rejected_by": user, "error": task.error }),
                None,
            )
            .await?;
        track_task(&task.task_type, task.status.as_str());
        Ok(task)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn refresh(&self, tenant: TenantId, task_id: Uuid) -> Result<Task> {
        self.load(tenant, task_id).await
    }

    async fn dispatch(&self, task: &Task) -> Result<Option<Agent>> {
        let started = Instant::now();
        let tenant = task.tenant_id;
        let required = task.required_capabilities();
        let deps = &self.deps;

        let found = deps
            .engine
            .run_activity("dispatch", RetryPolicy::from(deps.config.dispatch), || async {
                if let Some(id) = task.assigned_agent_id {
                    return Ok(deps.directory.get_agent(tenant, id).await?.map(|a| (a, None)));
                }
                match task.group_id {
                    Some(group) => Ok(deps
                        .dispatcher
                        .find_best_agent(tenant, group, &required, &HashSet::new())
                        .await?
                        .map(|s| (s.agent, Some(s.score)))),
                    None => Ok(None),
                }
            })
            .await;
        track_step("dispatch", matches!(found, Ok(Some(_))), started.elapsed().as_secs_f64());

        let Some((agent, score)) = found? else {
            return Ok(None);
        };

        if task.assigned_agent_id != Some(agent.id) {
            let mut updated = self.refresh(tenant, task.id).await?;
            updated.assigned_agent_id = Some(agent.id);
            self.deps.tasks.update_unless_failed(&updated).await?;
        }

        // The chat bridge records its own dispatched row.
        if !self.deps.traces.has_step(tenant, task.id, StepType::Dispatched).await? {
            self.deps
                .traces
                .record(
                    tenant,
                    task.id,
                    StepType::Dispatched,
                    Some(agent.id),
                    json!({ "agent": agent.name, "score": score, "required": required }),
                    Some(elapsed_ms(started)),
                )
                .await?;
        }
        tracing::info!(agent = %agent.name, "Task dispatched");
        Ok(Some(agent))
    }

    /// Fail-open: a recall error leaves the prompt without context.
    async fn recall(&self, task: &Task, agent: &Agent) -> Option<String> {
        let started = Instant::now();
        let tenant = task.tenant_id;
        let deps = &self.deps;
        let query = MemoryQuery {
            types: None,
            limit: RECALL_LIMIT,
            min_importance: RECALL_MIN_IMPORTANCE,
        };

        let recalled = deps
            .engine
            .run_activity("memory_recall", RetryPolicy::from(deps.config.memory_recall), || async {
                let relevant = deps.memory.get_relevant(tenant, agent.id, &query).await?;
                let mut touched = Vec::with_capacity(relevant.len());
                for memory in relevant {
                    if let Some(m) = deps.memory.recall(tenant, memory.id).await? {
                        touched.push(m);
                    }
                }
                Ok(touched)
            })
            .await;
        track_step("memory_recall", recalled.is_ok(), started.elapsed().as_secs_f64());

        let (memories, details) = match recalled {
            Ok(memories) => {
                let details = json!({ "count": memories.len() });
                (memories, details)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Memory recall failed, continuing without context");
                (Vec::new(), json!({ "count": 0, "error": e.to_string() }))
            }
        };
        self.deps
            .traces
            .record_lossy(
                tenant,
                task.id,
                StepType::MemoryRecall,
                Some(agent.id),
                details,
                Some(elapsed_ms(started)),
            )
            .await;

        if memories.is_empty() {
            return None;
        }
        let lines: Vec<String> = memories
            .iter()
            .map(|m| format!("- {}", preview(&m.content, 300)))
            .collect();
        Some(format!("Relevant context:\n{}", lines.join("\n")))
    }

    async fn tools_for(&self, task: &Task, agent: &Agent) -> Result<Arc<InMemoryToolRegistry>> {
        let tenant = task.tenant_id;
        let registry = InMemoryToolRegistry::new();
        let ctx = CallContext {
            task_id: Some(task.id),
            agent_id: Some(agent.id),
        };

        for config in self.deps.catalog.list_configs(tenant).await? {
            if !config.enabled {
                continue;
            }
            if !config.requires_approval {
                if let Some(tool) = self.deps.builtins.get(&config.skill_name).await? {
                    registry.insert(tool);
                    continue;
                }
            }
            if let Some(router) = &self.deps.skill_router {
                registry.insert(Arc::new(GatewaySkillTool::new(
                    router.clone(),
                    tenant,
                    config.skill_name.clone(),
                    ctx,
                )));
            }
        }

        if task.delegation_depth() < agent.max_delegation_depth {
            let targets = self
                .deps
                .dispatcher
                .delegation_targets(tenant, agent.id, task.group_id)
                .await?;
            if !targets.is_empty() {
                registry.insert(Arc::new(DelegateTaskTool::new(self.clone(), tenant, task.id, agent.id)));
            }
        }
        Ok(Arc::new(registry))
    }

    async fn execute(&self, task: &Task, agent: &Agent, fragment: Option<String>) -> Result<Invocation> {
        let started = Instant::now();
        let tenant = task.tenant_id;

        let result = async {
            let tools = self.tools_for(task, agent).await?;
            let tools: Arc<dyn ToolRegistry> = tools;

            let message = match &fragment {
                Some(f) => format!("{}\n\n{}", task.objective, f),
                None => task.objective.clone(),
            };
            let mut invoke = InvokeRequest::new(tenant, agent.system_prompt(), message)
                .with_task(task.id, task.task_type.clone());
            invoke.priority = routing_priority(task.priority);
            let request = RuntimeRequest {
                invoke,
                agent: agent.clone(),
                runtime_session_id: task
                    .context
                    .get("runtime_session_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };

            let deps = &self.deps;
            deps.engine
                .run_activity("execute", RetryPolicy::from(deps.config.execute), || {
                    deps.runtime.run(request.clone(), tools.clone())
                })
                .await
        }
        .await;
        track_step("execute", result.is_ok(), started.elapsed().as_secs_f64());

        let details = match &result {
            Ok(inv) => json!({
                "runtime": self.deps.runtime.name(),
                "model": inv.model,
                "rounds": inv.rounds,
                "tool_calls": inv.tool_calls,
                "tool_errors": inv.tool_errors,
                "truncated": inv.truncated,
                "total_tokens": inv.usage.total_tokens(),
                "cost": inv.usage.cost,
                "reply_preview": inv.reply,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Execute step failed");
                json!({ "runtime": self.deps.runtime.name(), "error": e.to_string() })
            }
        };
        self.deps
            .traces
            .record_lossy(
                tenant,
                task.id,
                StepType::Executing,
                Some(agent.id),
                details,
                Some(elapsed_ms(started)),
            )
            .await;
        result
    }

    /// Fail-open: extraction or validation errors only zero the count.
    async fn persist(&self, task: &Task, agent: &Agent, invocation: Option<&Invocation>) -> PersistSummary {
        let started = Instant::now();
        let tenant = task.tenant_id;

        let reply = match invocation {
            Some(inv) if !inv.reply.trim().is_empty() => inv.reply.as_str(),
            _ => {
                self.deps
                    .traces
                    .record_lossy(
                        tenant,
                        task.id,
                        StepType::EntityPersist,
                        Some(agent.id),
                        json!({ "created": 0, "skipped": true }),
                        Some(elapsed_ms(started)),
                    )
                    .await;
                return PersistSummary::default();
            }
        };

        let deps = &self.deps;
        let result = deps
            .engine
            .run_activity("entity_persist", RetryPolicy::from(deps.config.entity_persist), || {
                self.persist_once(tenant, task.id, agent.id, reply)
            })
            .await;
        track_step("entity_persist", result.is_ok(), started.elapsed().as_secs_f64());

        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "Entity persistence failed, continuing");
                PersistSummary {
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        };
        self.deps
            .traces
            .record_lossy(
                tenant,
                task.id,
                StepType::EntityPersist,
                Some(agent.id),
                serde_json::to_value(&summary).unwrap_or(Value::Null),
                Some(elapsed_ms(started)),
            )
            .await;
        summary
    }

    async fn persist_once(&self, tenant: TenantId, task_id: Uuid, agent_id: Uuid, reply: &str) -> Result<PersistSummary> {
        let candidates = self
            .deps
            .extractor
            .extract(tenant, reply, ContentType::PlainText, None)
            .await?;
        let mut summary = PersistSummary {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return Ok(summary);
        }

        let outcome = self
            .deps
            .validator
            .validate(tenant, &candidates, &self.deps.validation)
            .await?;
        summary.accepted = outcome.accepted.len();
        summary.rejected = outcome.rejected.len();
        summary.duplicates_skipped = outcome.duplicates_skipped;
        summary.errors = outcome.errors;

        for mut entity in outcome.accepted {
            entity.source_agent_id = Some(agent_id);
            entity.collection_task_id = Some(task_id);
            self.deps.graph.create_entity(tenant, entity).await?;
            summary.created += 1;
        }
        tracing::info!(created = summary.created, "Entities persisted");
        Ok(summary)
    }

    async fn evaluate(
        &self,
        tenant: TenantId,
        task_id: Uuid,
        agent: &Agent,
        outcome: Result<Invocation>,
        persisted: &PersistSummary,
    ) -> Result<Task> {
        let started = Instant::now();
        let task = self.refresh(tenant, task_id).await?;
        if task.status == TaskStatus::Failed {
            return Ok(task);
        }

        let (succeeded, tool_errors, error) = match &outcome {
            Ok(inv) => (true, inv.tool_errors, None),
            Err(e) => (false, 0, Some(e.to_string())),
        };
        let confidence = confidence_for(succeeded, tool_errors);
        let summary = match (&outcome, &error) {
            (Ok(inv), _) => preview(&inv.reply, 300),
            (Err(_), Some(e)) => format!("failed: {}", preview(e, 300)),
            _ => String::new(),
        };

        let deps = &self.deps;
        let learned = deps
            .engine
            .run_activity("evaluate", RetryPolicy::from(deps.config.evaluate), || {
                self.learn(&task, agent, succeeded, confidence, &summary)
            })
            .await;
        if let Err(e) = learned {
            tracing::warn!(error = %e, "Evaluate bookkeeping failed");
        }

        let mut task = self.refresh(tenant, task_id).await?;
        if task.status == TaskStatus::Failed {
            return Ok(task);
        }
        task.confidence = Some(confidence);
        let step = if !succeeded {
            task.error = error.clone();
            task.finish(TaskStatus::Failed);
            StepType::Failed
        } else if agent.autonomy_level == AutonomyLevel::ApprovalRequired {
            task.requires_approval = true;
            task.status = TaskStatus::Reviewing;
            StepType::Reviewing
        } else {
            task.finish(TaskStatus::Completed);
            StepType::Completed
        };
        if !self.deps.tasks.update_unless_failed(&task).await? {
            return self.load(tenant, task_id).await;
        }
        track_step("evaluate", true, started.elapsed().as_secs_f64());
        track_task(&task.task_type, task.status.as_str());

        self.deps
            .traces
            .record(
                tenant,
                task_id,
                step,
                Some(agent.id),
                json!({
                    "confidence": confidence,
                    "entities_created": persisted.created,
                    "error": error,
                }),
                Some(elapsed_ms(started)),
            )
            .await?;
        tracing::info!(status = %task.status, confidence, "Task evaluated");
        Ok(task)
    }

    /// Experience memory and skill proficiency. Both fail-open.
    async fn learn(&self, task: &Task, agent: &Agent, succeeded: bool, confidence: f64, summary: &str) -> Result<()> {
        let tenant = task.tenant_id;
        let content = format!(
            "Task '{}' ({}) {}: {}",
            preview(&task.objective, 200),
            task.task_type,
            if succeeded { "succeeded" } else { "failed" },
            summary
        );
        let memory = NewMemory::new(agent.id, MemoryType::Experience, content)
            .with_importance(confidence)
            .with_source("task_pipeline")
            .with_source_task(task.id);
        if let Err(e) = self.deps.memory.store(tenant, memory).await {
            tracing::warn!(error = %e, "Failed to write experience memory");
        }

        match self.deps.directory.get_skill(tenant, agent.id, &task.task_type).await {
            Ok(Some(mut skill)) => {
                skill.record_use(succeeded);
                if let Err(e) = self.deps.directory.upsert_skill(skill).await {
                    tracing::warn!(error = %e, "Failed to update skill proficiency");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to load agent skill"),
        }
        Ok(())
    }

    /// Mark `task_id` failed unless it is already terminal.
    pub async fn fail(&self, tenant: TenantId, task_id: Uuid, agent_id: Option<Uuid>, error: &str) -> Result<Task> {
        let mut task = self.refresh(tenant, task_id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }
        task.error = Some(error.to_string());
        task.confidence = Some(FAILED_CONFIDENCE);
        task.finish(TaskStatus::Failed);
        self.deps.tasks.update(&task).await?;
        track_task(&task.task_type, task.status.as_str());
        self.deps
            .traces
            .record(
                tenant,
                task_id,
                StepType::Failed,
                agent_id.or(task.assigned_agent_id),
                json!({ "error": error }),
                None,
            )
            .await?;
        tracing::warn!(task_id = %task_id, error, "Task failed");
        Ok(task)
    }
}
