//! Chat-to-task bridge: each user message becomes a task whose output is
//! the assistant reply.
//!
//! Chat persistence is fail-closed. Task bookkeeping is fail-open: when it
//! breaks, the user still gets a reply.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    text::preview,
    traits::{AgentDirectory, ChatStore},
    types::{Agent, ChatSession, MessageRole, SessionMessage, StepType, Task, TaskStatus, TenantId},
    Error, Result,
};

use crate::pipeline::TaskPipeline;

pub const FALLBACK_MESSAGE: &str = "The service is temporarily unavailable. Please retry in a moment.";

const OBJECTIVE_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct BridgeReply {
    pub message: SessionMessage,
    pub task_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub task_status: Option<TaskStatus>,
}

pub struct ChatBridge {
    chat: Arc<dyn ChatStore>,
    directory: Arc<dyn AgentDirectory>,
    pipeline: TaskPipeline,
}

impl ChatBridge {
    pub fn new(chat: Arc<dyn ChatStore>, directory: Arc<dyn AgentDirectory>, pipeline: TaskPipeline) -> Self {
        Self {
            chat,
            directory,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &TaskPipeline {
        &self.pipeline
    }

    /// Open a chat session. A named kit must exist in the tenant.
    pub async fn create_session(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        agent_kit_id: Option<Uuid>,
        title: Option<String>,
    ) -> Result<ChatSession> {
        let mut session = ChatSession::new(tenant, user_id);
        if let Some(kit_id) = agent_kit_id {
            if self.chat.get_agent_kit(tenant, kit_id).await?.is_none() {
                return Err(Error::not_found(format!("agent kit {}", kit_id)));
            }
            session = session.with_agent_kit(kit_id);
        }
        session.title = title;
        self.chat.create_session(session.clone()).await?;
        tracing::info!(session_id = %session.id, tenant_id = %tenant, "Chat session created");
        Ok(session)
    }

    /// First agent of the session's kit, else the tenant's first agent.
    pub async fn resolve_agent(&self, session: &ChatSession) -> Result<Option<Agent>> {
        let tenant = session.tenant_id;
        if let Some(kit_id) = session.agent_kit_id {
            if let Some(kit) = self.chat.get_agent_kit(tenant, kit_id).await? {
                for id in kit.agent_ids {
                    if let Some(agent) = self.directory.get_agent(tenant, id).await? {
                        return Ok(Some(agent));
                    }
                }
            }
        }
        Ok(self.directory.list_agents(tenant).await?.into_iter().next())
    }

    #[tracing::instrument(skip(self, content), fields(tenant_id = %tenant, session_id = %session_id))]
    pub async fn handle_user_message(&self, tenant: TenantId, session_id: Uuid, content: &str) -> Result<BridgeReply> {
        let session = self
            .chat
            .get_session(tenant, session_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("chat session {}", session_id)))?;

        self.chat
            .append_message(SessionMessage::new(tenant, session_id, MessageRole::User, content))
            .await?;

        let agent = match self.resolve_agent(&session).await {
            Ok(agent) => agent,
            Err(e) => {
                tracing::error!(error = %e, "Agent resolution failed");
                None
            }
        };

        let (task, agent_id) = match agent {
            Some(agent) => {
                let agent_id = agent.id;
                (self.run_task(&session, agent, content).await, Some(agent_id))
            }
            None => {
                tracing::warn!("No agent available for session, skipping task bridge");
                (None, None)
            }
        };

        let reply_text = match &task {
            Some(t) if matches!(t.status, TaskStatus::Completed | TaskStatus::Reviewing) => t
                .output
                .as_deref()
                .filter(|o| !o.trim().is_empty())
                .unwrap_or(FALLBACK_MESSAGE)
                .to_string(),
            _ => FALLBACK_MESSAGE.to_string(),
        };

        let mut message = SessionMessage::new(tenant, session_id, MessageRole::Assistant, reply_text);
        message.task_id = task.as_ref().map(|t| t.id);
        message.agent_id = agent_id;
        if let Some(t) = &task {
            message.context = json!({
                "task_status": t.status,
                "entities_extracted": t.context.get("entities_created").cloned().unwrap_or(json!(0)),
            });
        }
        let message = self.chat.append_message(message).await?;

        Ok(BridgeReply {
            message,
            task_id: task.as_ref().map(|t| t.id),
            agent_id,
            task_status: task.as_ref().map(|t| t.status),
        })
    }

    /// Create and run the task. Returns `None` only when the task could not
    /// be created; every other failure comes back as a failed task.
    async fn run_task(&self, session: &ChatSession, agent: Agent, content: &str) -> Option<Task> {
        let tenant = session.tenant_id;
        let mut context = json!({
            "chat_session_id": session.id,
            "agent_kit_id": session.agent_kit_id,
            "source": "chat_bridge",
        });
        if let (Some(obj), Some(runtime)) = (context.as_object_mut(), &session.runtime_session_id) {
            obj.insert("runtime_session_id".into(), Value::String(runtime.clone()));
        }

        let task = Task::new(tenant, "chat", preview(content, OBJECTIVE_CHARS))
            .with_agent(agent.id)
            .with_status(TaskStatus::Executing)
            .with_context(context);
        let task = match self.pipeline.deps().tasks.create(task).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create chat task");
                return None;
            }
        };

        self.pipeline
            .traces()
            .record_lossy(
                tenant,
                task.id,
                StepType::Dispatched,
                Some(agent.id),
                json!({ "agent": agent.name, "source": "chat_bridge" }),
                None,
            )
            .await;
        self.link_session(session, &task).await;

        let finished = match self.pipeline.run(tenant, task.id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Pipeline failed for chat task");
                match self.pipeline.fail(tenant, task.id, Some(agent.id), &e.to_string()).await {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::error!(task_id = %task.id, error = %e, "Could not mark chat task failed");
                        let mut stale = task;
                        stale.status = TaskStatus::Failed;
                        stale
                    }
                }
            }
        };

        if let Some(runtime) = finished.context.get("runtime_session_id").and_then(Value::as_str) {
            if session.runtime_session_id.as_deref() != Some(runtime) {
                self.remember_runtime_session(tenant, session.id, runtime).await;
            }
        }
        Some(finished)
    }

    async fn link_session(&self, session: &ChatSession, task: &Task) {
        if session.root_task_id.is_some() {
            return;
        }
        let mut updated = session.clone();
        updated.root_task_id = Some(task.id);
        if let Err(e) = self.chat.update_session(&updated).await {
            tracing::warn!(error = %e, "Failed to link session to root task");
        }
    }

    async fn remember_runtime_session(&self, tenant: TenantId, session_id: Uuid, runtime: &str) {
        let result = async {
            if let Some(mut session) = self.chat.get_session(tenant, session_id).await? {
                session.runtime_session_id = Some(runtime.to_string());
                self.chat.update_session(&session).await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to store runtime session id");
        }
    }
}
