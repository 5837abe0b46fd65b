//! Orchestra - multi-agent orchestration core.
//!
//! Wires the stores (SQLite-backed when a database path is set), the credential vault, the skill router, the model
//! router and the task pipeline behind the HTTP gateway.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use orchestra_controller::{AdkRuntime, ChatBridge, PipelineBuilder, RubricRegistry, Seeder};
use orchestra_core::config::AppConfig;
use orchestra_core::embedding::HashEmbedder;
use orchestra_core::traits::{
    CredentialStore, Embedder, KnowledgeGraph, LlmCatalog, MemoryStore, TaskStore, Tool, TraceStore,
};
use orchestra_gateway::{AppState, GatewayConfig, GatewayServer};
use orchestra_governance::{CredentialVault, ValidationPolicy};
use orchestra_model_gateway::{default_models, ModelRouter, OpenAiEmbedder};
use orchestra_skills::{CalculatorTool, InMemoryToolRegistry, SkillRouter, SqlQueryTool};
use orchestra_store::{
    InMemoryAgentDirectory, InMemoryChatStore, InMemoryCredentialStore, InMemoryKnowledgeGraph,
    InMemoryLlmCatalog, InMemoryMemoryStore, InMemorySkillCatalog, InMemoryTaskStore, InMemoryTraceStore,
    SqliteCredentialStore, SqliteKnowledgeGraph, SqliteMemoryStore, SqliteTaskStore, SqliteTraceStore,
};

const IN_MEMORY: &str = ":memory:";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    orchestra_governance::configure_tracing(config.logging.json)?;

    tracing::info!("Starting Orchestra v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = orchestra_governance::setup_metrics_recorder()?;

    // =========================================================================
    // Stores
    // =========================================================================
    let persistent = config.database.sqlite_path != IN_MEMORY;
    let (traces, credentials): (Arc<dyn TraceStore>, Arc<dyn CredentialStore>) = if persistent {
        let path = &config.database.sqlite_path;
        tracing::info!(path = %path, "Opening SQLite trace and credential stores");
        (
            Arc::new(SqliteTraceStore::open(path)?),
            Arc::new(SqliteCredentialStore::open(path)?),
        )
    } else {
        tracing::info!("Using in-memory trace and credential stores");
        (Arc::new(InMemoryTraceStore::new()), Arc::new(InMemoryCredentialStore::new()))
    };

    let (tasks, memory): (Arc<dyn TaskStore>, Arc<dyn MemoryStore>) = if persistent {
        let path = &config.database.sqlite_path;
        tracing::info!(path = %path, "Opening SQLite task and memory stores");
        (Arc::new(SqliteTaskStore::open(path)?), Arc::new(SqliteMemoryStore::open(path)?))
    } else {
        (Arc::new(InMemoryTaskStore::new()), Arc::new(InMemoryMemoryStore::new()))
    };
    let directory = Arc::new(InMemoryAgentDirectory::new());
    let chat = Arc::new(InMemoryChatStore::new());
    let skills = Arc::new(InMemorySkillCatalog::new());

    let embedder: Arc<dyn Embedder> = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => {
            tracing::info!("Using OpenAI embeddings");
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.llm.request_timeout_secs))
                .build()?;
            Arc::new(OpenAiEmbedder::new(
                http,
                "https://api.openai.com/v1",
                SecretString::new(key),
                config.llm.embedding_dimensions,
            ))
        }
        Err(_) => {
            tracing::warn!("OPENAI_API_KEY not set - using local hash embeddings");
            Arc::new(HashEmbedder::new(config.llm.embedding_dimensions))
        }
    };
    let graph: Arc<dyn KnowledgeGraph> = if persistent {
        Arc::new(SqliteKnowledgeGraph::open(&config.database.sqlite_path, embedder)?)
    } else {
        Arc::new(InMemoryKnowledgeGraph::new(embedder))
    };

    // =========================================================================
    // Governance & skills
    // =========================================================================
    let vault = Arc::new(CredentialVault::new(credentials, config.vault.master_key.as_ref())?);
    if !vault.is_configured() {
        tracing::warn!("Master key missing - credential operations will fail");
    }
    let skill_router = Arc::new(SkillRouter::new(skills.clone(), vault, traces.clone(), &config.gateway)?);

    let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(CalculatorTool)];
    if let Some(path) = &config.database.dataset_path {
        tracing::info!(path = %path, "Registering sql_query over dataset");
        tools.push(Arc::new(SqlQueryTool::open(path)?));
    }
    let builtins = Arc::new(InMemoryToolRegistry::with_tools(tools));

    // =========================================================================
    // Models
    // =========================================================================
    let llm_catalog = Arc::new(InMemoryLlmCatalog::new());
    for model in default_models() {
        llm_catalog.upsert_model(model).await?;
    }
    let models = Arc::new(ModelRouter::new(llm_catalog.clone(), config.llm.clone())?);

    if let Some(path) = &config.database.seed_path {
        Seeder::new(
            directory.clone(),
            chat.clone(),
            skills.clone(),
            llm_catalog,
            config.gateway.instance_type.clone(),
        )
        .load_file(path)
        .await?;
    }

    // =========================================================================
    // Pipeline
    // =========================================================================
    let mut builder = PipelineBuilder::new()
        .with_config(config.pipeline.clone())
        .with_validation(ValidationPolicy::from(&config.validation))
        .with_tasks(tasks)
        .with_directory(directory.clone())
        .with_memory(memory)
        .with_graph(graph)
        .with_traces(traces)
        .with_catalog(skills)
        .with_resolver(models)
        .with_skill_router(skill_router)
        .with_builtins(builtins);

    if let Some(runtime) = AdkRuntime::from_config(&config.agent_runtime)? {
        tracing::info!(app = %config.agent_runtime.app_name, "Using ADK agent runtime");
        builder = builder.with_runtime(Arc::new(runtime));
    }
    let pipeline = builder.build()?;
    let bridge = Arc::new(ChatBridge::new(chat, directory, pipeline));

    // =========================================================================
    // Gateway
    // =========================================================================
    let rubrics = Arc::new(RubricRegistry::with_defaults()?);
    let server = GatewayServer::new(GatewayConfig::from(&config.server), AppState::new(bridge, rubrics))
        .with_metrics(metrics_handle);

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Gateway initialized"
    );

    server.run().await?;

    Ok(())
}
