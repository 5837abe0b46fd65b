//! Core types, traits, and error definitions for Orchestra.
//!
//! This crate provides the data model and the repository/service seams shared
//! by every layer of the orchestration core. Implementations live in the
//! `store`, `governance`, `model_gateway`, `skills` and `controller` crates.

pub mod config;
pub mod embedding;
pub mod error;
pub mod mocks;
pub mod text;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
