use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub vault: VaultConfig,
    pub llm: LlmSettings,
    pub pipeline: PipelineConfig,
    pub gateway: GatewaySettings,
    pub agent_runtime: AgentRuntimeConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite path for tasks, memories, the knowledge graph, traces and
    /// credentials. `:memory:` keeps them in process.
    pub sqlite_path: String,
    /// Read-only SQLite dataset exposed through the `sql_query` tool.
    pub dataset_path: Option<String>,
    /// YAML file with tenants, agents, kits, skill and LLM configs to load at boot.
    pub seed_path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: ":memory:".into(),
            dataset_path: None,
            seed_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VaultConfig {
    /// 32-byte master key, hex (64 chars) or base64 encoded.
    pub master_key: Option<Secret<String>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmSettings {
    pub default_primary_model: Option<String>,
    pub default_fallback_model: Option<String>,
    /// Provider name to base URL overrides for OpenAI-wire providers.
    pub base_urls: HashMap<String, String>,
    pub anthropic_base_url: Option<String>,
    pub embedding_dimensions: usize,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            default_primary_model: None,
            default_fallback_model: None,
            base_urls: HashMap::new(),
            anthropic_base_url: None,
            embedding_dimensions: 1536,
            request_timeout_secs: 120,
        }
    }
}

/// Retry policy knobs for a single pipeline activity.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct StepPolicy {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub dispatch: StepPolicy,
    pub memory_recall: StepPolicy,
    pub execute: StepPolicy,
    pub entity_persist: StepPolicy,
    pub evaluate: StepPolicy,
    pub max_tool_rounds: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dispatch: StepPolicy {
                timeout_secs: 120,
                max_attempts: 3,
                initial_backoff_ms: 30_000,
            },
            memory_recall: StepPolicy {
                timeout_secs: 60,
                max_attempts: 3,
                initial_backoff_ms: 1_000,
            },
            execute: StepPolicy {
                timeout_secs: 600,
                max_attempts: 1,
                initial_backoff_ms: 1_000,
            },
            entity_persist: StepPolicy {
                timeout_secs: 120,
                max_attempts: 2,
                initial_backoff_ms: 1_000,
            },
            evaluate: StepPolicy {
                timeout_secs: 120,
                max_attempts: 3,
                initial_backoff_ms: 1_000,
            },
            max_tool_rounds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewaySettings {
    pub instance_type: String,
    pub namespace: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            instance_type: "openclaw".into(),
            namespace: "tenants".into(),
            port: 18789,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentRuntimeConfig {
    /// ADK runtime base URL. When unset the tool loop runs in process.
    pub base_url: Option<String>,
    pub app_name: String,
    pub request_timeout_secs: u64,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            app_name: "orchestra".into(),
            request_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_entities_per_task: usize,
    pub max_entities_per_hour: usize,
    pub required_fields: Vec<String>,
    pub prohibited_patterns: Vec<String>,
    pub dedup_fields: Vec<String>,
    pub min_confidence: f64,
    pub max_name_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_entities_per_task: 500,
            max_entities_per_hour: 1000,
            required_fields: vec!["name".into(), "entity_type".into()],
            prohibited_patterns: Vec::new(),
            dedup_fields: vec!["name".into(), "entity_type".into()],
            min_confidence: 0.0,
            max_name_length: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ORCHESTRA_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__SERVER__PORT=3000 to server.port
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_boot_without_files() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.gateway.port, 18789);
        assert_eq!(cfg.gateway.request_timeout_secs, 60);
        assert_eq!(cfg.validation.max_entities_per_task, 500);
        assert_eq!(cfg.llm.embedding_dimensions, 1536);
        assert_eq!(cfg.pipeline.max_tool_rounds, 10);
        assert!(cfg.vault.master_key.is_none());
        assert_eq!(cfg.database.sqlite_path, ":memory:");
        assert!(cfg.database.dataset_path.is_none());
        assert!(cfg.database.seed_path.is_none());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let cfg: AppConfig = Config::builder()
            .set_override("server.port", 8080)
            .and_then(|b| b.set_override("validation.max_entities_per_hour", 10))
            .and_then(|b| b.set_override("database.seed_path", "seed.yaml"))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.validation.max_entities_per_hour, 10);
        assert_eq!(cfg.validation.max_name_length, 500);
        assert_eq!(cfg.database.seed_path.as_deref(), Some("seed.yaml"));
        assert_eq!(cfg.database.sqlite_path, ":memory:");
    }
}
