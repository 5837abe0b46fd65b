//! Agent runtimes for the execute step: the in-process tool loop, or an
//! external ADK agent server reached over HTTP.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use orchestra_core::{
    config::AgentRuntimeConfig,
    text::preview,
    traits::ToolRegistry,
    types::Agent,
    Error, Result,
};

use crate::invoker::{Invocation, InvokeRequest, LlmInvoker};

#[derive(Debug, Clone)]
pub struct RuntimeRequest {
    pub invoke: InvokeRequest,
    pub agent: Agent,
    /// Session on the runtime to continue, if the caller has one.
    pub runtime_session_id: Option<String>,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, request: RuntimeRequest, tools: Arc<dyn ToolRegistry>) -> Result<Invocation>;
}

// =============================================================================
// In-process
// =============================================================================

pub struct InProcessRuntime {
    invoker: Arc<LlmInvoker>,
}

impl InProcessRuntime {
    pub fn new(invoker: Arc<LlmInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl AgentRuntime for InProcessRuntime {
    fn name(&self) -> &str {
        "in_process"
    }

    async fn run(&self, request: RuntimeRequest, tools: Arc<dyn ToolRegistry>) -> Result<Invocation> {
        self.invoker.run(request.invoke, tools.as_ref()).await
    }
}

// =============================================================================
// ADK
// =============================================================================

enum RunFailure {
    SessionLost,
    Failed(Error),
}

/// Text of the last non-user event, its `text` parts concatenated.
pub fn response_text(events: &[Value]) -> String {
    events
        .iter()
        .rev()
        .filter(|e| e.get("author").and_then(Value::as_str) != Some("user"))
        .find_map(|e| {
            let parts = e.pointer("/content/parts")?.as_array()?;
            let text: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_default()
}

pub struct AdkRuntime {
    http: reqwest::Client,
    base_url: String,
    app_name: String,
}

impl AdkRuntime {
    pub fn new(base_url: impl Into<String>, app_name: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(Error::configuration("agent runtime base URL is empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("agent runtime http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_name: app_name.into(),
        })
    }

    pub fn from_config(config: &AgentRuntimeConfig) -> Result<Option<Self>> {
        match &config.base_url {
            Some(url) => Ok(Some(Self::new(
                url.clone(),
                config.app_name.clone(),
                Duration::from_secs(config.request_timeout_secs),
            )?)),
            None => Ok(None),
        }
    }

    pub async fn create_session(&self, user_id: &str, state: Value) -> Result<String> {
        let url = format!("{}/apps/{}/users/{}/sessions", self.base_url, self.app_name, user_id);
        let response = self
            .http
            .post(&url)
            .json(&state)
            .send()
            .await
            .map_err(|e| Error::AgentRuntime(format!("create_session: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AgentRuntime(format!(
                "create_session returned {}: {}",
                status,
                preview(&body, 200)
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::AgentRuntime(format!("create_session body: {}", e)))?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::AgentRuntime("create_session response has no id".into()))
    }

    async fn run_once(&self, user_id: &str, session_id: &str, message: &str) -> std::result::Result<Vec<Value>, RunFailure> {
        let body = json!({
            "app_name": self.app_name,
            "user_id": user_id,
            "session_id": session_id,
            "new_message": { "role": "user", "parts": [{ "text": message }] },
        });
        let response = self
            .http
            .post(format!("{}/run", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RunFailure::Failed(Error::AgentRuntime(format!("run: {}", e))))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RunFailure::Failed(Error::AgentRuntime(format!("run body: {}", e))))?;
        if status.as_u16() == 404 || text.contains("Session not found") {
            return Err(RunFailure::SessionLost);
        }
        if !status.is_success() {
            return Err(RunFailure::Failed(Error::AgentRuntime(format!(
                "run returned {}: {}",
                status,
                preview(&text, 200)
            ))));
        }
        serde_json::from_str::<Vec<Value>>(&text)
            .map_err(|e| RunFailure::Failed(Error::AgentRuntime(format!("run events: {}", e))))
    }
}

#[async_trait]
impl AgentRuntime for AdkRuntime {
    fn name(&self) -> &str {
        "adk"
    }

    /// The ADK server owns its own tools; the registry is not forwarded.
    async fn run(&self, request: RuntimeRequest, _tools: Arc<dyn ToolRegistry>) -> Result<Invocation> {
        let user_id = request.invoke.tenant_id.to_string();
        let state = json!({
            "tenant_id": request.invoke.tenant_id,
            "task_id": request.invoke.task_id,
            "agent_id": request.agent.id,
            "agent_name": request.agent.name,
            "system_prompt": request.invoke.system_prompt,
        });

        let mut session_id = match request.runtime_session_id {
            Some(id) => id,
            None => self.create_session(&user_id, state.clone()).await?,
        };

        let events = match self.run_once(&user_id, &session_id, &request.invoke.user_message).await {
            Ok(events) => events,
            Err(RunFailure::SessionLost) => {
                tracing::warn!(session_id = %session_id, "Runtime session lost, recreating once");
                session_id = self.create_session(&user_id, state).await?;
                match self.run_once(&user_id, &session_id, &request.invoke.user_message).await {
                    Ok(events) => events,
                    Err(RunFailure::SessionLost) => {
                        return Err(Error::AgentRuntime("session lost after recreate".into()))
                    }
                    Err(RunFailure::Failed(e)) => return Err(e),
                }
            }
            Err(RunFailure::Failed(e)) => return Err(e),
        };

        Ok(Invocation {
            reply: response_text(&events),
            rounds: 1,
            runtime_session_id: Some(session_id),
            ..Default::default()
        })
    }
}
