//! Orchestration controller for Orchestra.
//!
//! This crate runs tasks: agent dispatch, the tool-use loop, knowledge
//! extraction and scoring, the five-step task pipeline with its trace, the
//! bridge from chat messages to tasks, and YAML seeding of tenant data.

pub mod bridge;
pub mod builder;
pub mod delegation;
pub mod dispatcher;
pub mod extractor;
pub mod invoker;
pub mod pipeline;
pub mod rubrics;
pub mod runtime;
pub mod scoring;
pub mod seed;
pub mod trace;
pub mod workflow;

pub use bridge::{BridgeReply, ChatBridge, FALLBACK_MESSAGE};
pub use builder::PipelineBuilder;
pub use delegation::{DelegateTaskTool, DELEGATE_TOOL_NAME};
pub use dispatcher::{AgentDispatcher, ScoredAgent};
pub use extractor::{ContentType, EntitySchema, KnowledgeExtractor};
pub use invoker::{Invocation, InvokeRequest, LlmInvoker};
pub use pipeline::{PersistSummary, TaskPipeline, NO_AGENT_ERROR};
pub use rubrics::{Rubric, RubricCategory, RubricRegistry};
pub use runtime::{AdkRuntime, AgentRuntime, InProcessRuntime, RuntimeRequest};
pub use scoring::EntityScorer;
pub use seed::{SeedReport, Seeder};
pub use trace::TraceRecorder;
pub use workflow::{EngineStats, RetryPolicy, WorkflowEngine};
