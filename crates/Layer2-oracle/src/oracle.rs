//! Capability oracle trait
//!
//! Every reasoning call goes through [`CapabilityOracle::propose`]. Test suites
//! substitute a deterministic implementation without touching orchestration.

use crate::error::OracleError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The place in the pipeline that issued a call
///
/// Each call site has its own constrained output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    /// `{"intent": "direct" | "task"}`
    Routing,
    /// `{"parallel": bool, "subtasks": [...]}`
    Decomposition,
    /// One python code block
    CodeGeneration,
    /// One python code block
    CodeRepair,
    /// Markdown with YAML frontmatter
    Documentation,
    /// Free text
    Conversation,
    /// Free text answering the request from a finished plan
    Synthesis,
}

impl CallSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSite::Routing => "routing",
            CallSite::Decomposition => "decomposition",
            CallSite::CodeGeneration => "code_generation",
            CallSite::CodeRepair => "code_repair",
            CallSite::Documentation => "documentation",
            CallSite::Conversation => "conversation",
            CallSite::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured prompt for one call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    pub call_site: CallSite,
    /// Role / instructions
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl OracleRequest {
    pub fn new(call_site: CallSite, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            call_site,
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

/// Token usage reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Raw, unvalidated reply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

impl OracleResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// External reasoning service
///
/// Treated as a pure function with latency and nondeterministic output; it is
/// never assumed idempotent. Responses are validated by [`crate::OracleClient`].
#[async_trait]
pub trait CapabilityOracle: Send + Sync {
    async fn propose(&self, request: OracleRequest) -> Result<OracleResponse, OracleError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}
