//! Skills layer for Orchestra.
//!
//! This crate provides:
//! - Tool registry for the tool-use loop
//! - Built-in tools (calculator, read-only SQL)
//! - Skill router: per-tenant gateway resolution, approval, rate limits and
//!   credential injection
//! - HTTP client for the tenant gateway

pub mod builtin;
pub mod gateway;
pub mod rate_limit;
pub mod registry;
pub mod router;

pub use builtin::{check_read_only_sql, CalculatorTool, SqlQueryTool};
pub use gateway::{gateway_internal_url, GatewayClient, GATEWAY_PORT};
pub use rate_limit::RateLimiter;
pub use registry::InMemoryToolRegistry;
pub use router::{CallContext, GatewaySkillTool, SkillRouter};
