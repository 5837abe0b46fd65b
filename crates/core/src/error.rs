//! Error types for Orchestra.

use thiserror::Error;

/// Result type alias using Orchestra's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed message shown to users when the platform is misconfigured.
pub const CONFIGURATION_USER_MESSAGE: &str =
    "This workspace is not fully configured yet. Please contact your administrator.";

/// Core error type for Orchestra.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential vault is not configured (missing master key)")]
    VaultNotConfigured,

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    // =========================================================================
    // Lookup & Integrity Errors
    // =========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    // =========================================================================
    // External Errors
    // =========================================================================
    #[error("LLM provider error{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    LlmProvider { status: Option<u16>, message: String },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Agent runtime error: {0}")]
    AgentRuntime(String),

    // =========================================================================
    // Skills Errors
    // =========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    // =========================================================================
    // Knowledge Errors
    // =========================================================================
    #[error("Extraction failed: {0}")]
    Extraction(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an integrity error.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Create an LLM provider error with an optional HTTP status.
    pub fn llm(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::LlmProvider {
            status,
            message: msg.into(),
        }
    }

    /// Create a gateway error.
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create an extraction error.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the workflow engine may retry the failed activity.
    ///
    /// Provider 5xx and connection failures, storage contention, gateway
    /// failures and timeouts are transient. Everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LlmProvider { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            Self::Storage(_) | Self::Gateway(_) | Self::Timeout(_) | Self::AgentRuntime(_) => true,
            _ => false,
        }
    }

    /// Short operator-safe message for `{error: string}` payloads.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(_) | Self::VaultNotConfigured => {
                CONFIGURATION_USER_MESSAGE.to_string()
            }
            Self::NotFound(what) => format!("Not found: {}", what),
            Self::Validation(msg) | Self::RateLimited(msg) => msg.clone(),
            Self::Timeout(_) => "Execution timeout".to_string(),
            Self::LlmProvider { .. } => "The language model provider returned an error".to_string(),
            Self::Gateway(msg) => msg.clone(),
            _ => "Internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::llm(Some(503), "overloaded").is_retryable());
        assert!(Error::llm(None, "connection reset").is_retryable());
        assert!(!Error::llm(Some(401), "bad key").is_retryable());
        assert!(!Error::llm(Some(429), "quota").is_retryable());
        assert!(!Error::validation("missing name").is_retryable());
        assert!(!Error::configuration("no key").is_retryable());
        assert!(Error::storage("database is locked").is_retryable());
    }

    #[test]
    fn test_configuration_message_is_fixed() {
        let msg = Error::configuration("OPENAI key missing for tenant").user_message();
        assert_eq!(msg, CONFIGURATION_USER_MESSAGE);
        assert!(!msg.contains("OPENAI"));
    }

    #[test]
    fn test_llm_display_includes_status() {
        let err = Error::llm(Some(429), "quota");
        assert_eq!(err.to_string(), "LLM provider error (HTTP 429): quota");
    }
}
