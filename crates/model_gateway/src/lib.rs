//! Model gateway for Orchestra.
//!
//! This crate provides:
//! - Per-tenant model routing with priority fallback
//! - Provider factory: OpenAI-wire client and Anthropic adapter
//! - Remote embeddings
//! - Context budgeting and history summarisation
//! - Model rates and cost accounting

pub mod anthropic;
pub mod context;
pub mod embeddings;
pub mod openai;
pub mod pricing;
pub mod providers;
pub mod router;

pub use anthropic::AnthropicClient;
pub use context::{ContextManager, PreparedContext, CONTEXT_BUDGET_TOKENS, SUMMARY_TRIGGER_TOKENS};
pub use embeddings::OpenAiEmbedder;
pub use openai::OpenAiClient;
pub use pricing::{default_models, CostTracker};
pub use providers::ProviderFactory;
pub use router::{rank_by_priority, ModelRouter};
