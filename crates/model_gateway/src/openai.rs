//! OpenAI-wire chat client.
//!
//! Serves openai, deepseek, mistral and google (through its
//! OpenAI-compatible endpoint); only the base URL differs.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use orchestra_core::{
    text::preview,
    traits::{ChatMessage, ChatRequest, LlmClient, LlmResponse, LlmUsage, Role, StopReason, ToolCall},
    Error, Result,
};

/// Characters of an error body kept in provider errors.
pub(crate) const ERROR_BODY_CHARS: usize = 200;

pub struct OpenAiClient {
    http: Client,
    provider: String,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiClient {
    pub fn new(http: Client, provider: impl Into<String>, base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http,
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Wire mapping
// =============================================================================

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn message_to_wire(msg: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": role_str(msg.role),
        "content": msg.content,
    });
    if !msg.tool_calls.is_empty() {
        wire["tool_calls"] = msg
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {"name": c.name, "arguments": c.arguments.to_string()},
                })
            })
            .collect();
    }
    if let Some(id) = &msg.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }
    wire
}

pub(crate) fn request_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages.iter().map(message_to_wire).collect::<Vec<_>>(),
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = request.max_tokens {
        body["max_tokens"] = json!(m);
    }
    body
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_response(body: CompletionResponse) -> Result<LlmResponse> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::llm(None, "response contained no choices"))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| ToolCall {
            id: c.id,
            name: c.function.name,
            // Arguments arrive as a JSON string; keep raw text if it is not JSON.
            arguments: serde_json::from_str(&c.function.arguments)
                .unwrap_or(Value::String(c.function.arguments)),
        })
        .collect();

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("stop") | None => {
            if tool_calls.is_empty() {
                StopReason::EndTurn
            } else {
                StopReason::ToolUse
            }
        }
        Some(_) => StopReason::Other,
    };

    let usage = body.usage.map_or_else(LlmUsage::default, |u| LlmUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
    });

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop_reason,
        usage,
    })
}

/// Map a transport failure onto the provider error kind.
pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> Error {
    let status = e.status().map(|s| s.as_u16());
    Error::llm(status, format!("{} request failed: {}", provider, e))
}

/// Read a non-success response into a provider error carrying its status.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::llm(
        Some(status),
        format!("{} returned {}: {}", provider, status, preview(&body, ERROR_BODY_CHARS)),
    )
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| transport_error(&self.provider, e))?;

        if !response.status().is_success() {
            return Err(status_error(&self.provider, response).await);
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(None, format!("{} response parse failed: {}", self.provider, e)))?;
        let parsed = parse_response(body)?;

        tracing::debug!(
            provider = %self.provider,
            model = %request.model,
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            "Chat completion finished"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use orchestra_core::types::ToolDefinition;
    use secrecy::Secret;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> OpenAiClient {
        OpenAiClient::new(Client::new(), "openai", base, Secret::new("sk-test".into()))
    }

    #[test]
    fn test_request_body_shapes_tool_calls() {
        let request = ChatRequest::new(
            "gpt-4o",
            vec![
                ChatMessage::user("add"),
                ChatMessage::assistant_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "c1".into(),
                        name: "calculator".into(),
                        arguments: json!({"expression": "1+1"}),
                    }],
                ),
                ChatMessage::tool_result("c1", "2"),
            ],
        )
        .with_tools(vec![ToolDefinition {
            name: "calculator".into(),
            description: "math".into(),
            parameters: json!({"type": "object"}),
        }]);

        let body = request_body(&request);
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["arguments"], json!("{\"expression\":\"1+1\"}"));
        assert_eq!(body["messages"][2]["tool_call_id"], json!("c1"));
        assert_eq!(body["tools"][0]["function"]["name"], json!("calculator"));
    }

    #[tokio::test]
    async fn test_chat_parses_tool_calls_and_usage() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                Json(json!({
                    "choices": [{
                        "message": {
                            "content": null,
                            "tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": {"name": "calculator", "arguments": "{\"expression\":\"2*3\"}"}
                            }]
                        },
                        "finish_reason": "tool_calls"
                    }],
                    "usage": {"prompt_tokens": 42, "completion_tokens": 7}
                }))
            }),
        );
        let base = serve(router).await;

        let resp = client(&base)
            .chat(&ChatRequest::new("gpt-4o", vec![ChatMessage::user("2*3?")]))
            .await
            .unwrap();
        assert!(resp.wants_tools());
        assert_eq!(resp.tool_calls[0].arguments, json!({"expression": "2*3"}));
        assert_eq!(resp.usage.prompt_tokens, 42);
        assert_eq!(resp.usage.completion_tokens, 7);
    }

    #[tokio::test]
    async fn test_http_errors_carry_status() {
        let router = Router::new()
            .route(
                "/bad/chat/completions",
                post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
            )
            .route(
                "/down/chat/completions",
                post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            );
        let base = serve(router).await;
        let req = ChatRequest::new("m", vec![ChatMessage::user("hi")]);

        let err = client(&format!("{}/bad", base)).chat(&req).await.unwrap_err();
        assert!(matches!(err, Error::LlmProvider { status: Some(401), .. }));
        assert!(!err.is_retryable());

        let err = client(&format!("{}/down", base)).chat(&req).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
