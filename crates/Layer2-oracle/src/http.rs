//! OpenAI-compatible HTTP oracle
//!
//! Works against any `/chat/completions` endpoint (OpenAI, Ollama, vLLM,
//! LM Studio). Non-streaming: every call site needs the whole reply before
//! it can validate anything.

use crate::error::OracleError;
use crate::oracle::{CapabilityOracle, OracleRequest, OracleResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use skillforge_foundation::{Error, OracleConfig, Result};
use std::time::Duration;
use tracing::debug;

pub struct HttpOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.model.clone(),
            config.api_key.clone(),
            config.timeout(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &OracleRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: request.system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        }
    }

    fn parse_error_response(status: reqwest::StatusCode, body: &str) -> OracleError {
        if let Ok(error_response) = serde_json::from_str::<ChatErrorResponse>(body) {
            let error = error_response.error;
            return match error.code.as_deref() {
                Some("rate_limit_exceeded") => OracleError::RateLimited {
                    retry_after_ms: None,
                },
                Some("invalid_api_key") => OracleError::Authentication(error.message),
                Some("model_not_found") => OracleError::ModelNotAvailable(error.message),
                _ => OracleError::from_http_status(status.as_u16(), &error.message),
            };
        }
        OracleError::from_http_status(status.as_u16(), body)
    }
}

#[async_trait]
impl CapabilityOracle for HttpOracle {
    async fn propose(&self, request: OracleRequest) -> std::result::Result<OracleResponse, OracleError> {
        let body = self.build_request(&request);
        debug!(
            "POST {} ({}, {} chars)",
            self.endpoint,
            request.call_site,
            request.prompt.len()
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::RequestFailed(format!("timed out: {}", e))
            } else {
                OracleError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error_response(status, &body));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::InvalidResponse("No choices in response".to_string()))?;

        Ok(OracleResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: api_response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: ChatErrorBody,
}

#[derive(Debug, Deserialize)]
struct ChatErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::CallSite;

    fn oracle() -> HttpOracle {
        HttpOracle::new(
            "http://localhost:11434/v1/",
            "test-model",
            Some(String::new()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_and_empty_key() {
        let oracle = oracle();
        assert_eq!(oracle.endpoint(), "http://localhost:11434/v1/chat/completions");
        assert!(oracle.api_key.is_none());
    }

    #[test]
    fn test_build_request() {
        let request = OracleRequest::new(CallSite::Routing, "sys", "hello");
        let body = oracle().build_request(&request);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_error_mapping() {
        let body = r#"{"error": {"message": "bad key", "code": "invalid_api_key"}}"#;
        let err = HttpOracle::parse_error_response(reqwest::StatusCode::UNAUTHORIZED, body);
        assert!(matches!(err, OracleError::Authentication(m) if m == "bad key"));

        let err = HttpOracle::parse_error_response(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert!(matches!(err, OracleError::ServerError(_)));
    }
}
