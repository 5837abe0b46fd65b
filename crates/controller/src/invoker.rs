//! Provider-agnostic tool-use loop.
//!
//! 1. Resolve a model for the tenant and budget the context
//! 2. Call the model with the registry's tools declared
//! 3. Execute requested tools and feed results back
//! 4. Stop on a text reply or after `max_rounds`

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    text::preview,
    traits::{ChatMessage, ChatRequest, ModelResolver, ToolRegistry},
    types::{RoutingPriority, TenantId, ToolOutput},
    Result,
};
use orchestra_governance::track_tokens;
use orchestra_model_gateway::{ContextManager, CostTracker};

pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Reply used when the loop runs out of rounds without any text.
pub const ROUND_LIMIT_REPLY: &str =
    "I was not able to finish this request within the allowed number of steps.";

const TOOL_RESULT_CHARS: usize = 8_000;

/// One invocation of the loop.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub tenant_id: TenantId,
    pub task_id: Option<Uuid>,
    pub task_type: Option<String>,
    pub priority: RoutingPriority,
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub user_message: String,
}

impl InvokeRequest {
    pub fn new(tenant_id: TenantId, system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            tenant_id,
            task_id: None,
            task_type: None,
            priority: RoutingPriority::default(),
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            user_message: user_message.into(),
        }
    }

    pub fn with_task(mut self, task_id: Uuid, task_type: impl Into<String>) -> Self {
        self.task_id = Some(task_id);
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

/// What the loop produced and what it cost.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Invocation {
    pub reply: String,
    pub model: Option<String>,
    pub rounds: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    /// True when the round limit cut the loop short.
    pub truncated: bool,
    pub usage: CostTracker,
    /// Session handle on an external runtime, when one was used.
    pub runtime_session_id: Option<String>,
}

pub struct LlmInvoker {
    resolver: Arc<dyn ModelResolver>,
    context: ContextManager,
    max_rounds: usize,
}

impl LlmInvoker {
    pub fn new(resolver: Arc<dyn ModelResolver>) -> Self {
        Self {
            resolver,
            context: ContextManager::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    pub fn with_context_manager(mut self, context: ContextManager) -> Self {
        self.context = context;
        self
    }

    pub fn resolver(&self) -> &Arc<dyn ModelResolver> {
        &self.resolver
    }

    #[tracing::instrument(skip(self, request, tools), fields(tenant_id = %request.tenant_id, task_id = ?request.task_id))]
    pub async fn run(&self, request: InvokeRequest, tools: &dyn ToolRegistry) -> Result<Invocation> {
        let resolved = self
            .resolver
            .resolve(request.tenant_id, request.task_type.as_deref(), request.priority)
            .await?;
        let model = resolved.model;
        let client = resolved.client;

        let mut history = request.history;
        history.push(ChatMessage::user(request.user_message));
        let prepared = self
            .context
            .prepare(client.as_ref(), &model.model_name, &request.system_prompt, history)
            .await;

        let mut messages = Vec::with_capacity(prepared.messages.len() + 1);
        messages.push(ChatMessage::system(prepared.system_prompt));
        messages.extend(prepared.messages);

        let declared = tools.list().await?;
        let mut out = Invocation {
            model: Some(model.model_name.clone()),
            ..Default::default()
        };
        let mut last_text = String::new();

        while out.rounds < self.max_rounds {
            out.rounds += 1;
            let chat = ChatRequest::new(&model.model_name, messages.clone()).with_tools(declared.clone());
            let response = client.chat(&chat).await?;

            let cost = out.usage.record(&model, response.usage);
            track_tokens(
                &model.model_name,
                response.usage.prompt_tokens,
                response.usage.completion_tokens,
                cost,
            );

            if !response.content.trim().is_empty() {
                last_text = response.content.clone();
            }

            if !response.wants_tools() {
                tracing::info!(rounds = out.rounds, tool_calls = out.tool_calls, "Model returned final reply");
                out.reply = response.content;
                return Ok(out);
            }

            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in response.tool_calls {
                out.tool_calls += 1;
                tracing::debug!(tool = %call.name, "Executing tool call");
                let content = match tools.execute(&call.name, call.arguments).await {
                    Ok(ToolOutput::Ok(content)) => content,
                    Ok(ToolOutput::Failed(message)) => {
                        out.tool_errors += 1;
                        format!("Error: {}", message)
                    }
                    Err(e) => {
                        out.tool_errors += 1;
                        tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
                        format!("Error: {}", e)
                    }
                };
                messages.push(ChatMessage::tool_result(call.id, preview(&content, TOOL_RESULT_CHARS)));
            }
        }

        tracing::warn!(max_rounds = self.max_rounds, "Tool loop hit the round limit");
        out.truncated = true;
        out.reply = if last_text.is_empty() {
            ROUND_LIMIT_REPLY.to_string()
        } else {
            last_text
        };
        Ok(out)
    }
}
