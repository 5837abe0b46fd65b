//! Anthropic Messages API adapter.
//!
//! Takes OpenAI-shaped requests, hoists system turns into the top-level
//! `system` field, folds tool results into user turns, and normalises the
//! reply back into an `LlmResponse`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use orchestra_core::{
    traits::{ChatMessage, ChatRequest, LlmClient, LlmResponse, LlmUsage, Role, StopReason, ToolCall},
    Error, Result,
};

use crate::openai::{status_error, transport_error};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl AnthropicClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Request conversion
// =============================================================================

/// Append `block` to the last turn if it has the same role, else open a new turn.
fn push_block(turns: &mut Vec<Value>, role: &str, block: Value) {
    if let Some(last) = turns.last_mut() {
        if last["role"] == role {
            if let Some(content) = last["content"].as_array_mut() {
                content.push(block);
                return;
            }
        }
    }
    turns.push(json!({"role": role, "content": [block]}));
}

fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut turns = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.clone()),
            Role::User => push_block(&mut turns, "user", json!({"type": "text", "text": msg.content})),
            Role::Assistant => {
                if !msg.content.is_empty() {
                    push_block(&mut turns, "assistant", json!({"type": "text", "text": msg.content}));
                }
                for call in &msg.tool_calls {
                    push_block(
                        &mut turns,
                        "assistant",
                        json!({"type": "tool_use", "id": call.id, "name": call.name, "input": call.arguments}),
                    );
                }
            }
            Role::Tool => push_block(
                &mut turns,
                "user",
                json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                }),
            ),
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, turns)
}

pub(crate) fn request_body(request: &ChatRequest) -> Value {
    let (system, messages) = convert_messages(&request.messages);
    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
            .collect();
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    body
}

// =============================================================================
// Response conversion
// =============================================================================

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn parse_response(body: MessagesResponse) -> LlmResponse {
    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in body.content {
        match block {
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::Unknown => {}
        }
    }

    let stop_reason = match body.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("end_turn") | Some("stop_sequence") | None => StopReason::EndTurn,
        Some(_) => StopReason::Other,
    };

    LlmResponse {
        content: text.join(""),
        tool_calls,
        stop_reason,
        usage: body.usage.map_or_else(LlmUsage::default, |u| LlmUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
        }),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        if !response.status().is_success() {
            return Err(status_error("anthropic", response).await);
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(None, format!("anthropic response parse failed: {}", e)))?;
        Ok(parse_response(body))
    }
}
