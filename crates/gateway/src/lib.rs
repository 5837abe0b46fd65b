//! HTTP surface for Orchestra.
//!
//! Chat messages go through the chat bridge; task traces, workflow stats
//! and the approval actions read from and act on the task pipeline.

pub mod error;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use server::{AppState, GatewayConfig, GatewayServer};
