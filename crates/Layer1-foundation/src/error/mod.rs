//! Error types for SkillForge
//!
//! 모든 에러를 중앙에서 관리한다. 각 레이어는 이 타입을 그대로 사용하고,
//! 복구 가능한 에러는 해당 레이어에서 재시도 한도까지 처리한 뒤
//! SubTask/Plan 결과에 첨부한다.

use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SkillForge 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 라우팅 / 계획
    // ========================================================================
    /// Router could not decide; callers fall back to a sequential task.
    #[error("Routing ambiguity: {0}")]
    RoutingAmbiguity(String),

    /// Decomposition output was unusable; callers collapse to one subtask.
    #[error("Malformed plan: {0}")]
    PlanningMalformed(String),

    // ========================================================================
    // Sandbox 관련
    // ========================================================================
    #[error("Sandbox timed out after {}ms", .timeout.as_millis())]
    SandboxTimeout { timeout: Duration },

    #[error("Sandbox resource limit exceeded: {0}")]
    SandboxResourceExceeded(String),

    #[error("Sandbox runtime failure: {0}")]
    SandboxRuntime(String),

    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    // ========================================================================
    // Oracle 관련
    // ========================================================================
    #[error("Malformed oracle response at {call_site}: {message}")]
    OracleMalformedResponse { call_site: String, message: String },

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // ========================================================================
    // Skill 검증 / 인덱스
    // ========================================================================
    #[error("Verification rejected: {0}")]
    VerificationRejected(String),

    #[error("Skill index write conflict: {0}")]
    SkillIndexWriteConflict(String),

    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SandboxTimeout { .. }
                | Error::SandboxResourceExceeded(_)
                | Error::SandboxRuntime(_)
                | Error::OracleMalformedResponse { .. }
                | Error::Timeout(_)
                | Error::RateLimited(_)
                | Error::Http(_)
        )
    }

    /// Sandbox 실행 실패인지 확인
    pub fn is_sandbox_failure(&self) -> bool {
        matches!(
            self,
            Error::SandboxTimeout { .. }
                | Error::SandboxResourceExceeded(_)
                | Error::SandboxRuntime(_)
                | Error::SandboxUnavailable(_)
        )
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::SkillNotFound(_)
                | Error::InvalidInput(_)
                | Error::Validation(_)
                | Error::Config(_)
                | Error::Cancelled
        )
    }

    /// Oracle 응답 형식 에러 생성 헬퍼
    pub fn malformed(call_site: impl Into<String>, message: impl Into<String>) -> Self {
        Error::OracleMalformedResponse {
            call_site: call_site.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::SandboxTimeout {
            timeout: Duration::from_secs(30)
        }
        .is_retryable());
        assert!(Error::malformed("decomposition", "no json").is_retryable());
        assert!(!Error::VerificationRejected("lint".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::SandboxTimeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Sandbox timed out after 1500ms");
    }

    #[test]
    fn test_user_facing() {
        assert!(Error::Cancelled.is_user_facing());
        assert!(!Error::Internal("boom".into()).is_user_facing());
    }
}
