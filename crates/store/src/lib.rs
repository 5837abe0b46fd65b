//! Persistence layer for Orchestra.
//!
//! In-memory implementations of every repository trait, plus SQLite-backed
//! stores for the durable tables: tasks, agent memory, the knowledge graph,
//! execution traces and credential ciphertext.

pub mod agents;
pub mod catalog;
pub mod chat;
pub mod credentials;
pub mod knowledge;
pub mod memory;
pub mod sqlite;
pub mod tasks;
pub mod traces;

pub use agents::InMemoryAgentDirectory;
pub use catalog::{InMemoryLlmCatalog, InMemorySkillCatalog};
pub use chat::InMemoryChatStore;
pub use credentials::{InMemoryCredentialStore, SqliteCredentialStore};
pub use knowledge::{InMemoryKnowledgeGraph, SqliteKnowledgeGraph};
pub use memory::{InMemoryMemoryStore, SqliteMemoryStore};
pub use tasks::{InMemoryTaskStore, SqliteTaskStore};
pub use traces::{InMemoryTraceStore, SqliteTraceStore};
