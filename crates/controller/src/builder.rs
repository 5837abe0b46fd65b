//! Builder for TaskPipeline.

use std::sync::Arc;

use orchestra_core::{
    config::PipelineConfig,
    traits::{AgentDirectory, KnowledgeGraph, MemoryStore, ModelResolver, SkillCatalog, TaskStore, TraceStore},
    Error, Result,
};
use orchestra_governance::{EntityValidator, ValidationPolicy};
use orchestra_skills::{InMemoryToolRegistry, SkillRouter};

use crate::dispatcher::AgentDispatcher;
use crate::extractor::KnowledgeExtractor;
use crate::invoker::LlmInvoker;
use crate::pipeline::{PipelineDeps, TaskPipeline};
use crate::runtime::{AgentRuntime, InProcessRuntime};
use crate::trace::TraceRecorder;
use crate::workflow::WorkflowEngine;

/// Builder for constructing a TaskPipeline.
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    validation: ValidationPolicy,
    tasks: Option<Arc<dyn TaskStore>>,
    directory: Option<Arc<dyn AgentDirectory>>,
    memory: Option<Arc<dyn MemoryStore>>,
    graph: Option<Arc<dyn KnowledgeGraph>>,
    traces: Option<Arc<dyn TraceStore>>,
    catalog: Option<Arc<dyn SkillCatalog>>,
    resolver: Option<Arc<dyn ModelResolver>>,
    runtime: Option<Arc<dyn AgentRuntime>>,
    skill_router: Option<Arc<SkillRouter>>,
    builtins: Option<Arc<InMemoryToolRegistry>>,
    engine: Option<Arc<WorkflowEngine>>,
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| Error::configuration(format!("pipeline builder: {} is required", name)))
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_validation(mut self, policy: ValidationPolicy) -> Self {
        self.validation = policy;
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn AgentDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn KnowledgeGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_traces(mut self, traces: Arc<dyn TraceStore>) -> Self {
        self.traces = Some(traces);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn SkillCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Model resolver for extraction and, unless a runtime is set, the tool loop.
    pub fn with_resolver(mut self, resolver: Arc<dyn ModelResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the in-process tool loop, e.g. with an ADK runtime.
    pub fn with_runtime(mut self, runtime: Arc<dyn AgentRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_skill_router(mut self, router: Arc<SkillRouter>) -> Self {
        self.skill_router = Some(router);
        self
    }

    /// In-process tools offered when the tenant enables a skill of the same name.
    pub fn with_builtins(mut self, builtins: Arc<InMemoryToolRegistry>) -> Self {
        self.builtins = Some(builtins);
        self
    }

    pub fn with_engine(mut self, engine: Arc<WorkflowEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> Result<TaskPipeline> {
        let resolver = required(self.resolver, "model resolver")?;
        let graph = required(self.graph, "knowledge graph")?;
        let directory = required(self.directory, "agent directory")?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => {
                let invoker = LlmInvoker::new(resolver.clone()).with_max_rounds(self.config.max_tool_rounds);
                Arc::new(InProcessRuntime::new(Arc::new(invoker)))
            }
        };
        tracing::debug!(runtime = runtime.name(), "Building task pipeline");

        Ok(TaskPipeline::new(PipelineDeps {
            tasks: required(self.tasks, "task store")?,
            dispatcher: AgentDispatcher::new(directory.clone()),
            directory,
            memory: required(self.memory, "memory store")?,
            validator: EntityValidator::new(graph.clone()),
            graph,
            catalog: required(self.catalog, "skill catalog")?,
            skill_router: self.skill_router,
            builtins: self.builtins.unwrap_or_default(),
            runtime,
            extractor: Arc::new(KnowledgeExtractor::new(resolver)),
            validation: self.validation,
            traces: TraceRecorder::new(required(self.traces, "trace store")?),
            engine: self.engine.unwrap_or_default(),
            config: self.config,
        }))
    }
}
