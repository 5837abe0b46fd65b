//! Tool registry implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use orchestra_core::{
    traits::{Tool, ToolRegistry},
    types::{ToolDefinition, ToolOutput},
    Error, Result,
};

/// Tool registry keyed by name.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let registry = Self::new();
        for tool in tools {
            registry.tools.insert(tool.name().to_string(), tool);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Copy of the registry holding only the tools `keep` accepts.
    pub fn filtered(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self::with_tools(
            self.tools
                .iter()
                .filter(|e| keep(e.key().as_str()))
                .map(|e| e.value().clone())
                .collect::<Vec<_>>(),
        )
    }

    /// Add a tool without going through the async trait.
    pub fn insert(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }
}

#[async_trait]
impl ToolRegistry for InMemoryToolRegistry {
    async fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        tracing::info!(tool = %tool.name(), "Registering tool");
        self.insert(tool);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Arc<dyn Tool>>> {
        Ok(self.tools.get(name).map(|e| e.value().clone()))
    }

    async fn list(&self) -> Result<Vec<ToolDefinition>> {
        let mut definitions: Vec<ToolDefinition> = self.tools.iter().map(|e| e.value().definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    async fn execute(&self, name: &str, args: Value) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::tool_not_found(name))?;

        tool.validate_params(&args)?;
        tracing::debug!(tool = %name, "Executing tool");
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::mocks::EchoTool;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_list_execute() {
        let registry = InMemoryToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await.unwrap();

        let defs = registry.list().await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");

        let out = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, ToolOutput::text("hi"));

        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_filtered_copy() {
        let registry = InMemoryToolRegistry::with_tools([
            Arc::new(EchoTool) as Arc<dyn Tool>,
            Arc::new(crate::builtin::CalculatorTool) as Arc<dyn Tool>,
        ]);
        let only_calc = registry.filtered(|name| name == "calculator");
        assert_eq!(only_calc.names(), vec!["calculator".to_string()]);
        assert_eq!(registry.len(), 2);
    }
}
