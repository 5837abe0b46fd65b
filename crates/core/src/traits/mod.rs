//! Core traits for Orchestra.
//!
//! - `llm`: model clients, embedders and the model resolver
//! - `skills`: Tool and ToolRegistry
//! - `store`: tenant-scoped repositories

pub mod llm;
pub mod skills;
pub mod store;

pub use llm::*;
pub use skills::*;
pub use store::*;
