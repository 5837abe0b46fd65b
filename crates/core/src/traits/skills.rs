//! Skills traits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{ToolDefinition, ToolOutput};

/// Tool interface for atomic operations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique name of the tool.
    fn name(&self) -> &str;

    /// Get the human-readable description.
    fn description(&self) -> &str;

    /// Get the JSON Schema for parameters.
    fn parameters(&self) -> Value;

    /// Reject malformed or unsafe arguments before execution.
    fn validate_params(&self, _args: &Value) -> Result<()> {
        Ok(())
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Tool registry keyed by name.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Register a new tool. A tool with the same name is replaced.
    async fn register(&self, tool: Arc<dyn Tool>) -> Result<()>;

    /// Get a tool by name.
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn Tool>>>;

    /// List all available tools.
    async fn list(&self) -> Result<Vec<ToolDefinition>>;

    /// Validate then execute a tool by name.
    async fn execute(&self, name: &str, args: Value) -> Result<ToolOutput>;
}
