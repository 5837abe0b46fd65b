//! Mock implementations of core traits for testing.
//!
//! Shared across crates so unit and scenario tests can script model
//! behaviour without a provider.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    traits::{
        ChatRequest, LlmClient, LlmResponse, LlmUsage, ModelResolver, ResolvedModel, StopReason,
        Tool, ToolCall,
    },
    types::{LlmModel, RoutingPriority, TenantId, ToolOutput},
    Error, Result,
};

// =============================================================================
// Mock LLM Client
// =============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Reply(LlmResponse),
    Fail { status: Option<u16>, message: String },
}

/// Scripted mock LLM that returns predefined responses in order.
///
/// Once the script runs out the last entry repeats.
pub struct MockLlm {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
}

impl MockLlm {
    fn from_script(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a mock LLM with a queue of responses.
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self::from_script(responses.into_iter().map(Scripted::Reply).collect())
    }

    /// Create a mock that always returns the same text.
    pub fn constant(text: &str) -> Self {
        Self::new(vec![text_response(text)])
    }

    /// Create a mock whose every call fails with a provider error.
    pub fn failing(status: Option<u16>, message: &str) -> Self {
        Self::from_script(vec![Scripted::Fail {
            status,
            message: message.to_string(),
        }])
    }

    /// Queue a failure after the already scripted replies.
    pub async fn push_failure(&self, status: Option<u16>, message: &str) {
        self.script.lock().await.push_back(Scripted::Fail {
            status,
            message: message.to_string(),
        });
    }

    /// Get the number of calls made to this mock.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        let next = self.script.lock().await.pop_front();
        let step = {
            let mut last = self.last.lock().await;
            match next {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Scripted::Reply(text_response("Done"))),
            }
        };

        match step {
            Scripted::Reply(resp) => Ok(resp),
            Scripted::Fail { status, message } => Err(Error::llm(status, message)),
        }
    }
}

/// A final text reply with fixed usage (10 prompt, 20 completion tokens).
pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: text.to_string(),
        tool_calls: Vec::new(),
        stop_reason: StopReason::EndTurn,
        usage: LlmUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
        },
    }
}

/// A reply asking for one tool call.
pub fn tool_call_response(call_id: &str, tool: &str, arguments: Value) -> LlmResponse {
    LlmResponse {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: call_id.to_string(),
            name: tool.to_string(),
            arguments,
        }],
        stop_reason: StopReason::ToolUse,
        usage: LlmUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        },
    }
}

// =============================================================================
// Mock Model Resolver
// =============================================================================

/// Resolves every request to the same model and client.
pub struct StaticModelResolver {
    model: LlmModel,
    client: Arc<dyn LlmClient>,
}

impl StaticModelResolver {
    pub fn new(model: LlmModel, client: Arc<dyn LlmClient>) -> Self {
        Self { model, client }
    }

    /// A free mock model backed by `client`.
    pub fn with_client(client: Arc<dyn LlmClient>) -> Self {
        Self::new(LlmModel::new("mock", "mock-model"), client)
    }
}

#[async_trait]
impl ModelResolver for StaticModelResolver {
    async fn resolve(
        &self,
        _tenant_id: TenantId,
        _task_type: Option<&str>,
        _priority: RoutingPriority,
    ) -> Result<ResolvedModel> {
        Ok(ResolvedModel {
            model: self.model.clone(),
            client: self.client.clone(),
        })
    }
}

// =============================================================================
// Mock Tool
// =============================================================================

/// Echoes its arguments back. Fails when `args.fail` is true.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input back"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        if args.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(Error::tool_execution("echo asked to fail"));
        }
        let text = args.get("text").and_then(Value::as_str).unwrap_or("");
        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatMessage;

    #[tokio::test]
    async fn test_mock_llm_repeats_last() {
        let llm = MockLlm::new(vec![text_response("one"), text_response("two")]);
        let req = ChatRequest::new("m", vec![ChatMessage::user("hi")]);
        assert_eq!(llm.chat(&req).await.unwrap().content, "one");
        assert_eq!(llm.chat(&req).await.unwrap().content, "two");
        assert_eq!(llm.chat(&req).await.unwrap().content, "two");
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_llm_failure() {
        let llm = MockLlm::failing(Some(401), "bad key");
        let req = ChatRequest::new("m", vec![]);
        let err = llm.chat(&req).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
