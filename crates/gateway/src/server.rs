//! Axum-based HTTP server over the chat bridge and the task pipeline.

use axum::{
    extract::{Json, MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use orchestra_controller::{BridgeReply, ChatBridge, EngineStats, EntityScorer, RubricRegistry, TaskPipeline};
use orchestra_core::{
    config::ServerConfig,
    traits::TaskStore,
    types::{ChatSession, EntityScore, ExecutionTrace, Task, TaskStatus, TenantId},
    Error, Result,
};

use crate::error::ApiError;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Enable CORS.
    pub enable_cors: bool,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            ..Self::default()
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub bridge: Arc<ChatBridge>,
    pub pipeline: TaskPipeline,
    pub tasks: Arc<dyn TaskStore>,
    pub scorer: EntityScorer,
}

impl AppState {
    /// State over a bridge; the pipeline, task store and scorer come from it.
    pub fn new(bridge: Arc<ChatBridge>, rubrics: Arc<RubricRegistry>) -> Self {
        let pipeline = bridge.pipeline().clone();
        let tasks = pipeline.deps().tasks.clone();
        let scorer = pipeline.scorer(rubrics);
        Self {
            bridge,
            pipeline,
            tasks,
            scorer,
        }
    }
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
            metrics_handle: None,
        }
    }

    /// Expose `/metrics` and record per-request metrics.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/v1/tenants/:tenant/chat/sessions", post(create_session_handler))
            .route(
                "/v1/tenants/:tenant/chat/sessions/:session/messages",
                post(chat_message_handler),
            )
            .route("/v1/tenants/:tenant/tasks/:task", get(task_handler))
            .route("/v1/tenants/:tenant/tasks/:task/traces", get(traces_handler))
            .route("/v1/tenants/:tenant/tasks/:task/approve", post(approve_handler))
            .route("/v1/tenants/:tenant/tasks/:task/reject", post(reject_handler))
            .route("/v1/tenants/:tenant/workflows/stats", get(stats_handler))
            .route("/v1/tenants/:tenant/entities/:entity/score", post(score_handler))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router
                .route("/metrics", get(move || async move { handle.render() }))
                .layer(middleware::from_fn(track_metrics));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::gateway(format!("Failed to bind: {}", e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .await
            .map_err(|e| Error::gateway(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().to_string();

    let response = next.run(req).await;

    orchestra_governance::track_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub agent_kit_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub rubric_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TraceListResponse {
    pub task_id: Uuid,
    pub traces: Vec<ExecutionTrace>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowStatsResponse {
    /// Active tasks plus workflows the engine is running.
    pub running_count: usize,
    pub queued_count: usize,
    pub reviewing_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub engine: EngineStats,
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<CreateSessionRequest>,
) -> std::result::Result<(StatusCode, Json<ChatSession>), ApiError> {
    let session = state
        .bridge
        .create_session(tenant, req.user_id, req.agent_kit_id, req.title)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn chat_message_handler(
    State(state): State<Arc<AppState>>,
    Path((tenant, session)): Path<(TenantId, Uuid)>,
    Json(req): Json<ChatMessageRequest>,
) -> std::result::Result<Json<BridgeReply>, ApiError> {
    if req.content.trim().is_empty() {
        return Err(Error::validation("content must not be empty").into());
    }
    let reply = state.bridge.handle_user_message(tenant, session, &req.content).await?;
    Ok(Json(reply))
}

async fn task_handler(
    State(state): State<Arc<AppState>>,
    Path((tenant, task)): Path<(TenantId, Uuid)>,
) -> std::result::Result<Json<Task>, ApiError> {
    Ok(Json(state.pipeline.load(tenant, task).await?))
}

async fn traces_handler(
    State(state): State<Arc<AppState>>,
    Path((tenant, task)): Path<(TenantId, Uuid)>,
) -> std::result::Result<Json<TraceListResponse>, ApiError> {
    state.pipeline.load(tenant, task).await?;
    let traces = state.pipeline.traces().list(tenant, task).await?;
    Ok(Json(TraceListResponse { task_id: task, traces }))
}

async fn approve_handler(
    State(state): State<Arc<AppState>>,
    Path((tenant, task)): Path<(TenantId, Uuid)>,
    Json(req): Json<ApproveRequest>,
) -> std::result::Result<Json<Task>, ApiError> {
    Ok(Json(state.pipeline.approve_task(tenant, task, req.user_id).await?))
}

async fn reject_handler(
    State(state): State<Arc<AppState>>,
    Path((tenant, task)): Path<(TenantId, Uuid)>,
    Json(req): Json<RejectRequest>,
) -> std::result::Result<Json<Task>, ApiError> {
    let task = state
        .pipeline
        .reject_task(tenant, task, req.user_id, req.reason.as_deref())
        .await?;
    Ok(Json(task))
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<TenantId>,
) -> std::result::Result<Json<WorkflowStatsResponse>, ApiError> {
    let tasks = state.tasks.list(tenant, None).await?;
    let count = |wanted: &[TaskStatus]| tasks.iter().filter(|t| wanted.contains(&t.status)).count();
    let engine = state.pipeline.engine().stats();

    Ok(Json(WorkflowStatsResponse {
        running_count: count(&[TaskStatus::Executing, TaskStatus::Thinking]) + engine.running,
        queued_count: count(&[TaskStatus::Queued]),
        reviewing_count: count(&[TaskStatus::Reviewing]),
        completed_count: count(&[TaskStatus::Completed]),
        failed_count: count(&[TaskStatus::Failed]),
        engine,
    }))
}

async fn score_handler(
    State(state): State<Arc<AppState>>,
    Path((tenant, entity)): Path<(TenantId, Uuid)>,
    Json(req): Json<ScoreRequest>,
) -> std::result::Result<Json<EntityScore>, ApiError> {
    let score = state
        .scorer
        .score_entity(tenant, entity, &req.rubric_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("entity {}", entity)))?;
    Ok(Json(score))
}
