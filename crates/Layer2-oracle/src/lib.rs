//! # SkillForge Oracle
//!
//! Capability oracle: the external reasoning service behind routing,
//! decomposition, code generation, repair and documentation.
//!
//! - [`CapabilityOracle`]: backend trait (HTTP, scripted)
//! - [`OracleClient`]: typed call sites with schema validation and retries
//! - [`extract`]: code / JSON / document extraction from free-text replies

pub mod client;
pub mod error;
pub mod extract;
pub mod http;
pub mod oracle;
pub mod prompts;
pub mod retry;
pub mod schema;
pub mod scripted;

pub use client::OracleClient;
pub use error::OracleError;
pub use http::HttpOracle;
pub use oracle::{CallSite, CapabilityOracle, OracleRequest, OracleResponse, TokenUsage};
pub use retry::{with_retry, RetryConfig};
pub use schema::{
    DecompositionReply, DocumentationRequest, Intent, ProposedSubtask, RoutingReply, SkillContext,
};
pub use scripted::ScriptedOracle;
