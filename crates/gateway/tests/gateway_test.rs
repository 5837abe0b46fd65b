use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use orchestra_controller::{ChatBridge, PipelineBuilder, RubricRegistry, FALLBACK_MESSAGE};
use orchestra_core::embedding::HashEmbedder;
use orchestra_core::mocks::{text_response, MockLlm, StaticModelResolver};
use orchestra_core::traits::{AgentDirectory, ChatStore, KnowledgeGraph, LlmResponse, TaskStore};
use orchestra_core::types::{Agent, AgentKit, AutonomyLevel, ChatSession, NewEntity, Task, TaskStatus};
use orchestra_gateway::{AppState, GatewayConfig, GatewayServer};
use orchestra_store::{
    InMemoryAgentDirectory, InMemoryChatStore, InMemoryKnowledgeGraph, InMemoryMemoryStore,
    InMemorySkillCatalog, InMemoryTaskStore, InMemoryTraceStore,
};

struct TestApp {
    tenant: Uuid,
    router: Router,
    tasks: Arc<InMemoryTaskStore>,
    directory: Arc<InMemoryAgentDirectory>,
    chat: Arc<InMemoryChatStore>,
    graph: Arc<InMemoryKnowledgeGraph>,
}

fn app(script: Vec<LlmResponse>) -> TestApp {
    let tasks = Arc::new(InMemoryTaskStore::new());
    let directory = Arc::new(InMemoryAgentDirectory::new());
    let chat = Arc::new(InMemoryChatStore::new());
    let llm = Arc::new(MockLlm::new(script));
    let graph = Arc::new(InMemoryKnowledgeGraph::new(Arc::new(HashEmbedder::new(64))));

    let pipeline = PipelineBuilder::new()
        .with_tasks(tasks.clone())
        .with_directory(directory.clone())
        .with_memory(Arc::new(InMemoryMemoryStore::new()))
        .with_graph(graph.clone())
        .with_traces(Arc::new(InMemoryTraceStore::new()))
        .with_catalog(Arc::new(InMemorySkillCatalog::new()))
        .with_resolver(Arc::new(StaticModelResolver::with_client(llm)))
        .build()
        .unwrap();
    let bridge = Arc::new(ChatBridge::new(chat.clone(), directory.clone(), pipeline));
    let config = GatewayConfig {
        enable_tracing: false,
        ..GatewayConfig::default()
    };
    let rubrics = Arc::new(RubricRegistry::with_defaults().unwrap());
    let router = GatewayServer::new(config, AppState::new(bridge, rubrics)).build_router();

    TestApp {
        tenant: Uuid::new_v4(),
        router,
        tasks,
        directory,
        chat,
        graph,
    }
}

impl TestApp {
    async fn session(&self) -> ChatSession {
        let session = ChatSession::new(self.tenant, Uuid::new_v4());
        self.chat.create_session(session.clone()).await.unwrap();
        session
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app(vec![]);
    let (status, body) = app.call("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_chat_message_runs_task_and_lists_traces() {
    let app = app(vec![text_response("Acme is hiring"), text_response("[]")]);
    app.directory.upsert_agent(Agent::new(app.tenant, "scout")).await.unwrap();
    let session = app.session().await;

    let uri = format!("/v1/tenants/{}/chat/sessions/{}/messages", app.tenant, session.id);
    let (status, reply) = app.call("POST", &uri, Some(json!({"content": "Any hiring news?"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["message"]["content"], "Acme is hiring");
    assert_eq!(reply["task_status"], "completed");

    let task_id = reply["task_id"].as_str().unwrap();
    let (status, body) = app
        .call("GET", &format!("/v1/tenants/{}/tasks/{}/traces", app.tenant, task_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let steps: Vec<&str> = body["traces"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["step_type"].as_str().unwrap())
        .collect();
    assert_eq!(steps.first(), Some(&"dispatched"));
    assert_eq!(steps.last(), Some(&"completed"));
}

#[tokio::test]
async fn test_chat_without_agent_returns_fallback() {
    let app = app(vec![]);
    let session = app.session().await;
    let uri = format!("/v1/tenants/{}/chat/sessions/{}/messages", app.tenant, session.id);

    let (status, reply) = app.call("POST", &uri, Some(json!({"content": "hello"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["message"]["content"], FALLBACK_MESSAGE);
    assert!(reply["task_id"].is_null());
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let app = app(vec![]);
    let uri = format!("/v1/tenants/{}/chat/sessions/{}/messages", app.tenant, Uuid::new_v4());
    let (status, body) = app.call("POST", &uri, Some(json!({"content": "hello"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_empty_content_is_400() {
    let app = app(vec![]);
    let session = app.session().await;
    let uri = format!("/v1/tenants/{}/chat/sessions/{}/messages", app.tenant, session.id);
    let (status, _) = app.call("POST", &uri, Some(json!({"content": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_traces_for_unknown_task_is_404() {
    let app = app(vec![]);
    let uri = format!("/v1/tenants/{}/tasks/{}/traces", app.tenant, Uuid::new_v4());
    let (status, _) = app.call("GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_workflow_stats_counts_active_tasks() {
    let app = app(vec![]);
    for status in [TaskStatus::Executing, TaskStatus::Thinking, TaskStatus::Queued, TaskStatus::Failed] {
        app.tasks
            .create(Task::new(app.tenant, "research", "x").with_status(status))
            .await
            .unwrap();
    }
    app.tasks
        .create(Task::new(Uuid::new_v4(), "research", "other tenant").with_status(TaskStatus::Executing))
        .await
        .unwrap();

    let (status, body) = app
        .call("GET", &format!("/v1/tenants/{}/workflows/stats", app.tenant), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running_count"], 2);
    assert_eq!(body["queued_count"], 1);
    assert_eq!(body["failed_count"], 1);
    assert_eq!(body["engine"]["running"], 0);
}

#[tokio::test]
async fn test_approve_reviewing_task() {
    let app = app(vec![text_response("Draft ready"), text_response("[]")]);
    app.directory
        .upsert_agent(Agent::new(app.tenant, "closer").with_autonomy(AutonomyLevel::ApprovalRequired))
        .await
        .unwrap();
    let session = app.session().await;
    let uri = format!("/v1/tenants/{}/chat/sessions/{}/messages", app.tenant, session.id);
    let (_, reply) = app.call("POST", &uri, Some(json!({"content": "Draft the email"}))).await;
    assert_eq!(reply["task_status"], "reviewing");
    assert_eq!(reply["message"]["content"], "Draft ready");

    let task_id = reply["task_id"].as_str().unwrap();
    let approve = format!("/v1/tenants/{}/tasks/{}/approve", app.tenant, task_id);
    let reviewer = Uuid::new_v4();
    let (status, task) = app.call("POST", &approve, Some(json!({"user_id": reviewer}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "completed");
    assert_eq!(task["approved_by"], json!(reviewer));

    let (status, body) = app.call("POST", &approve, Some(json!({"user_id": reviewer}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn test_reject_reviewing_task() {
    let app = app(vec![text_response("Draft ready"), text_response("[]")]);
    app.directory
        .upsert_agent(Agent::new(app.tenant, "closer").with_autonomy(AutonomyLevel::ApprovalRequired))
        .await
        .unwrap();
    let session = app.session().await;
    let uri = format!("/v1/tenants/{}/chat/sessions/{}/messages", app.tenant, session.id);
    let (_, reply) = app.call("POST", &uri, Some(json!({"content": "Draft the email"}))).await;
    let task_id: Uuid = reply["task_id"].as_str().unwrap().parse().unwrap();

    let reject = format!("/v1/tenants/{}/tasks/{}/reject", app.tenant, task_id);
    let (status, task) = app
        .call("POST", &reject, Some(json!({"user_id": Uuid::new_v4(), "reason": "tone"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "failed");
    let stored = app.tasks.get(app.tenant, task_id).await.unwrap().unwrap();
    assert_eq!(stored.error.as_deref(), Some("tone"));
}

#[tokio::test]
async fn test_create_session_then_chat() {
    let app = app(vec![text_response("Hello from scout"), text_response("[]")]);
    let agent = Agent::new(app.tenant, "scout");
    app.directory.upsert_agent(agent.clone()).await.unwrap();
    let kit = AgentKit {
        id: Uuid::new_v4(),
        tenant_id: app.tenant,
        name: "default".into(),
        agent_ids: vec![agent.id],
    };
    app.chat.upsert_agent_kit(kit.clone()).await.unwrap();

    let uri = format!("/v1/tenants/{}/chat/sessions", app.tenant);
    let user = Uuid::new_v4();
    let (status, session) = app
        .call("POST", &uri, Some(json!({"user_id": user, "agent_kit_id": kit.id})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["user_id"], json!(user));
    assert_eq!(session["agent_kit_id"], json!(kit.id));

    let session_id = session["id"].as_str().unwrap();
    let (status, reply) = app
        .call(
            "POST",
            &format!("{}/{}/messages", uri, session_id),
            Some(json!({"content": "hi"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["agent_id"], json!(agent.id));
    assert_eq!(reply["message"]["content"], "Hello from scout");

    let (status, body) = app
        .call("POST", &uri, Some(json!({"user_id": user, "agent_kit_id": Uuid::new_v4()})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_score_entity_route() {
    let app = app(vec![text_response(
        r#"{"score": 72, "breakdown": {"hiring": 20, "funding": 15}, "reasoning": "active AI hiring"}"#,
    )]);
    let acme = app
        .graph
        .create_entity(app.tenant, NewEntity::new("Acme", "ai_company"))
        .await
        .unwrap();

    let uri = format!("/v1/tenants/{}/entities/{}/score", app.tenant, acme.id);
    let (status, body) = app.call("POST", &uri, Some(json!({"rubric_id": "ai_lead"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["score"], json!(72));
    assert_eq!(body["breakdown"]["hiring"], json!(20));

    let stored = app.graph.get_entity(app.tenant, acme.id, false).await.unwrap().unwrap();
    assert_eq!(stored.entity.score, Some(72));

    let (status, _) = app.call("POST", &uri, Some(json!({"rubric_id": "nope"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = format!("/v1/tenants/{}/entities/{}/score", app.tenant, Uuid::new_v4());
    let (status, _) = app.call("POST", &missing, Some(json!({"rubric_id": "ai_lead"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
