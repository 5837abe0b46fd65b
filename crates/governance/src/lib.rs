//! Governance layer for Orchestra.
//!
//! This crate provides:
//! - Credential vault (AES-256-GCM at rest, master-key rotation)
//! - Entity validation ahead of knowledge-graph writes
//! - Trace detail sanitisation
//! - Logging / distributed tracing setup
//! - Prometheus metrics helpers

pub mod metrics;
pub mod redact;
pub mod tracing_layer;
pub mod validator;
pub mod vault;

pub use metrics::{
    setup_metrics_recorder, track_request, track_skill_call, track_step, track_task, track_tokens,
    track_validation,
};
pub use redact::sanitize_details;
pub use tracing_layer::configure_tracing;
pub use validator::{EntityValidator, Rejection, ValidationOutcome, ValidationPolicy};
pub use vault::{rotate_master_key, CredentialVault, MasterKey, RotationReport};
