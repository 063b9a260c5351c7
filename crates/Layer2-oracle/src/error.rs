//! Oracle-specific error types
//!
//! OracleError 는 전송 계층 세부 에러를 관리하고
//! skillforge_foundation::Error 로 변환된다.

use crate::retry::{RetryClassification, RetryableError};
use skillforge_foundation::Error as FoundationError;
use thiserror::Error;

/// Errors raised while talking to an oracle backend
#[derive(Error, Debug, Clone)]
pub enum OracleError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded{}", .retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    /// Server error (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// Request failed (timeout, connection reset)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport-level response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    #[error("Oracle not configured: {0}")]
    NotConfigured(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RetryableError for OracleError {
    fn classify(&self) -> RetryClassification {
        match self {
            OracleError::RateLimited { retry_after_ms } => RetryClassification::RateLimited {
                retry_after_ms: *retry_after_ms,
            },
            OracleError::ServerError(_)
            | OracleError::RequestFailed(_)
            | OracleError::Network(_) => RetryClassification::Retry,
            OracleError::Authentication(_)
            | OracleError::InvalidRequest(_)
            | OracleError::InvalidResponse(_)
            | OracleError::ModelNotAvailable(_)
            | OracleError::NotConfigured(_)
            | OracleError::Unknown(_) => RetryClassification::NoRetry,
        }
    }
}

impl OracleError {
    /// Create from HTTP status code and body
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => OracleError::Authentication(body.to_string()),
            429 => OracleError::RateLimited {
                retry_after_ms: extract_retry_after(body),
            },
            400 | 422 => OracleError::InvalidRequest(body.to_string()),
            404 => OracleError::ModelNotAvailable(body.to_string()),
            408 => OracleError::RequestFailed(body.to_string()),
            500..=599 => OracleError::ServerError(body.to_string()),
            _ => OracleError::Unknown(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Try to extract retry-after value from error body (in milliseconds)
fn extract_retry_after(body: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(secs) = json
            .get("error")
            .and_then(|e| e.get("retry_after"))
            .and_then(|v| v.as_f64())
        {
            return Some((secs * 1000.0) as u64);
        }
    }

    let idx = body.find("retry")?;
    let num_str: String = body[idx..]
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    num_str.parse::<f64>().ok().map(|secs| (secs * 1000.0) as u64)
}

// ============================================================================
// skillforge_foundation::Error 변환
// ============================================================================

impl From<OracleError> for FoundationError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::RateLimited { retry_after_ms } => FoundationError::RateLimited(
                retry_after_ms
                    .map(|ms| format!("Retry after {}ms", ms))
                    .unwrap_or_else(|| "Rate limited".to_string()),
            ),
            OracleError::RequestFailed(msg) => FoundationError::Http(msg),
            OracleError::Network(msg) => FoundationError::Http(format!("Network: {}", msg)),
            OracleError::NotConfigured(msg) => FoundationError::Config(msg),
            other => FoundationError::Oracle(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            OracleError::from_http_status(401, "bad key"),
            OracleError::Authentication(_)
        ));
        assert!(matches!(
            OracleError::from_http_status(503, "down"),
            OracleError::ServerError(_)
        ));
        assert_eq!(
            OracleError::from_http_status(429, r#"{"error": {"retry_after": 1.5}}"#).classify(),
            RetryClassification::RateLimited {
                retry_after_ms: Some(1500)
            }
        );
    }

    #[test]
    fn test_retry_after_plain_text() {
        assert_eq!(extract_retry_after("please retry in 2 seconds"), Some(2000));
        assert_eq!(extract_retry_after("slow down"), None);
    }

    #[test]
    fn test_foundation_conversion() {
        let err: FoundationError = OracleError::Authentication("nope".into()).into();
        assert!(matches!(err, FoundationError::Oracle(_)));
        let err: FoundationError = OracleError::Network("reset".into()).into();
        assert!(err.is_retryable());
    }
}
