use serde::{Deserialize, Serialize};

/// Result of one tool call, fed back to the model as the tool message.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Ok(String),
    /// Counted as a tool error by the invocation loop.
    Failed(String),
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Ok(content.into())
    }

    /// Structured results are handed to the model as compact JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Ok(value.to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Ok(s) | Self::Failed(s) => s,
        }
    }
}

/// Tool definition declared to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for tool arguments.
    pub parameters: serde_json::Value,
}
