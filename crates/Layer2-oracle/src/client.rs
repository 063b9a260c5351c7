//! Validating oracle client
//!
//! Wraps a [`CapabilityOracle`] and gives each call site a typed method.
//! Transport failures are retried with backoff; replies that do not match the
//! call site's schema are re-requested up to `malformed_retries` times and
//! then surface as [`Error::OracleMalformedResponse`].

use crate::error::OracleError;
use crate::extract::{extract_code, extract_document, extract_json, strip_thinking};
use crate::oracle::{CallSite, CapabilityOracle, OracleRequest, OracleResponse};
use crate::prompts;
use crate::retry::{with_retry, RetryConfig};
use crate::schema::{DecompositionReply, DocumentationRequest, Intent, RoutingReply, SkillContext};
use skillforge_foundation::{Error, OracleConfig, Result};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn CapabilityOracle>,
    retry: RetryConfig,
    malformed_retries: u32,
    max_tokens: u32,
    temperature: f32,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn CapabilityOracle>) -> Self {
        Self {
            oracle,
            retry: RetryConfig::default(),
            malformed_retries: 1,
            max_tokens: 2048,
            temperature: 0.2,
        }
    }

    pub fn from_config(oracle: Arc<dyn CapabilityOracle>, config: &OracleConfig) -> Self {
        Self {
            oracle,
            retry: RetryConfig::from_oracle_config(config),
            malformed_retries: config.malformed_retries,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_malformed_retries(mut self, retries: u32) -> Self {
        self.malformed_retries = retries;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.oracle.name()
    }

    /// Classify a request as conversational or executable
    pub async fn classify_intent(&self, text: &str) -> Result<Intent> {
        let (system, prompt) = prompts::routing(text);
        self.call(CallSite::Routing, system, prompt, |reply| {
            let value = extract_json(reply).ok_or("no JSON object in reply")?;
            serde_json::from_value::<RoutingReply>(value)
                .map(|r| r.intent)
                .map_err(|e| format!("unexpected routing reply: {}", e))
        })
        .await
    }

    /// Propose subtasks for a request
    pub async fn decompose(&self, text: &str) -> Result<DecompositionReply> {
        let (system, prompt) = prompts::decomposition(text);
        self.call(CallSite::Decomposition, system, prompt, |reply| {
            let value = extract_json(reply).ok_or("no JSON object in reply")?;
            serde_json::from_value::<DecompositionReply>(value)
                .map_err(|e| format!("unexpected decomposition reply: {}", e))
        })
        .await
    }

    /// Generate code for a subtask, with retrieved skills as context
    pub async fn generate_code(
        &self,
        description: &str,
        code_hint: Option<&str>,
        skills: &[SkillContext],
    ) -> Result<String> {
        let (system, prompt) = prompts::code_generation(description, code_hint, skills);
        self.call(CallSite::CodeGeneration, system, prompt, code_block)
            .await
    }

    /// Repair code that failed in the sandbox
    pub async fn repair_code(&self, description: &str, code: &str, failure: &str) -> Result<String> {
        let (system, prompt) = prompts::repair(description, code, failure);
        self.call(CallSite::CodeRepair, system, prompt, code_block)
            .await
    }

    /// Rewrite working code that failed lint or test during verification
    pub async fn refine_code(&self, description: &str, code: &str, feedback: &str) -> Result<String> {
        let (system, prompt) = prompts::refine(description, code, feedback);
        self.call(CallSite::CodeRepair, system, prompt, code_block)
            .await
    }

    /// Produce the skill document (frontmatter + sections)
    pub async fn document_skill(&self, request: &DocumentationRequest) -> Result<String> {
        let (system, prompt) = prompts::documentation(request);
        self.call(CallSite::Documentation, system, prompt, |reply| {
            extract_document(reply).ok_or_else(|| "reply has no YAML frontmatter".to_string())
        })
        .await
    }

    /// Plain conversational reply
    pub async fn converse(&self, text: &str) -> Result<String> {
        let (system, prompt) = prompts::conversation(text);
        self.call(CallSite::Conversation, system, prompt, free_text)
            .await
    }

    /// Answer `text` from the rendered results of a finished plan
    pub async fn synthesize(&self, text: &str, results: &str) -> Result<String> {
        let (system, prompt) = prompts::synthesis(text, results);
        self.call(CallSite::Synthesis, system, prompt, free_text)
            .await
    }

    async fn call<T, V>(&self, call_site: CallSite, system: String, prompt: String, validate: V) -> Result<T>
    where
        V: Fn(&str) -> std::result::Result<T, String>,
    {
        let mut request = OracleRequest::new(call_site, system, prompt);
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;

        let mut last_problem = String::new();
        for pass in 0..=self.malformed_retries {
            let response: OracleResponse = with_retry(&self.retry, call_site.as_str(), || {
                let request = request.clone();
                async move { self.oracle.propose(request).await }
            })
            .await
            .map_err(|e: OracleError| Error::from(e))?;

            match validate(&response.content) {
                Ok(value) => {
                    debug!("{}: accepted reply on pass {}", call_site, pass + 1);
                    return Ok(value);
                }
                Err(problem) => {
                    warn!("{}: malformed reply (pass {}): {}", call_site, pass + 1, problem);
                    last_problem = problem;
                }
            }
        }

        Err(Error::malformed(call_site.as_str(), last_problem))
    }
}

fn free_text(reply: &str) -> std::result::Result<String, String> {
    let reply = strip_thinking(reply);
    if reply.is_empty() {
        Err("empty reply".to_string())
    } else {
        Ok(reply)
    }
}

fn code_block(reply: &str) -> std::result::Result<String, String> {
    extract_code(reply).ok_or_else(|| "reply contains no code".to_string())
}
