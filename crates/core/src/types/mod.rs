//! Core type definitions for Orchestra.
//!
//! Every persisted record carries a `tenant_id`; all timestamps are UTC and
//! all ids are UUIDv4.

pub mod agent;
pub mod chat;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod skill;
pub mod task;
pub mod tool;
pub mod trace;

pub use agent::*;
pub use chat::*;
pub use knowledge::*;
pub use llm::*;
pub use memory::*;
pub use skill::*;
pub use task::*;
pub use tool::*;
pub use trace::*;

/// Tenant identifier. Every query and write is scoped by one.
pub type TenantId = uuid::Uuid;
