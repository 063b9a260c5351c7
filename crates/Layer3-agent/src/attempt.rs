//! Execution attempts and failure details

use serde::{Deserialize, Serialize};
use skillforge_foundation::Error;
use skillforge_sandbox::{RunStatus, SandboxOutput};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SandboxTimeout,
    SandboxResourceExceeded,
    SandboxRuntimeFailure,
    OracleMalformedResponse,
    /// Oracle transport failure
    Oracle,
    Cancelled,
    /// Panic or other bug
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SandboxTimeout => "sandbox_timeout",
            FailureKind::SandboxResourceExceeded => "sandbox_resource_exceeded",
            FailureKind::SandboxRuntimeFailure => "sandbox_runtime_failure",
            FailureKind::OracleMalformedResponse => "oracle_malformed_response",
            FailureKind::Oracle => "oracle",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }

    /// The oracle failed to hand back code; no run took place
    pub fn is_oracle(&self) -> bool {
        matches!(self, FailureKind::Oracle | FailureKind::OracleMalformedResponse)
    }

    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::SandboxTimeout { .. } => FailureKind::SandboxTimeout,
            Error::SandboxResourceExceeded(_) => FailureKind::SandboxResourceExceeded,
            Error::SandboxRuntime(_) | Error::SandboxUnavailable(_) | Error::Io(_) => {
                FailureKind::SandboxRuntimeFailure
            }
            Error::OracleMalformedResponse { .. } => FailureKind::OracleMalformedResponse,
            Error::Oracle(_) | Error::RateLimited(_) | Error::Http(_) | Error::Timeout(_) => {
                FailureKind::Oracle
            }
            Error::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Internal,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(error: &Error) -> Self {
        Self::new(FailureKind::from_error(error), error.to_string())
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    /// Failure of a sandbox run, if it failed
    pub fn from_output(output: &SandboxOutput) -> Option<Self> {
        let kind = match &output.status {
            RunStatus::Completed => return None,
            RunStatus::Failed => FailureKind::SandboxRuntimeFailure,
            RunStatus::TimedOut => FailureKind::SandboxTimeout,
            RunStatus::ResourceExceeded(_) => FailureKind::SandboxResourceExceeded,
            RunStatus::Cancelled => FailureKind::Cancelled,
        };
        Some(Self::new(kind, output.failure_context()))
    }
}

impl std::fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed(FailureDetail),
}

/// One run of one code version
///
/// Fields are private: an attempt cannot change once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    number: u32,
    code: String,
    stdout: String,
    stderr: String,
    return_value: Option<String>,
    exit_code: Option<i32>,
    duration: Duration,
    outcome: AttemptOutcome,
}

impl ExecutionAttempt {
    pub fn from_output(number: u32, code: impl Into<String>, output: &SandboxOutput) -> Self {
        let outcome = match FailureDetail::from_output(output) {
            Some(detail) => AttemptOutcome::Failed(detail),
            None => AttemptOutcome::Succeeded,
        };
        Self {
            number,
            code: code.into(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            return_value: output.return_value.clone(),
            exit_code: output.exit_code,
            duration: output.duration,
            outcome,
        }
    }

    /// Attempt that never reached the sandbox (generation failed, runtime unusable)
    pub fn failed(number: u32, code: impl Into<String>, detail: FailureDetail) -> Self {
        Self {
            number,
            code: code.into(),
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            exit_code: None,
            duration: Duration::ZERO,
            outcome: AttemptOutcome::Failed(detail),
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn return_value(&self) -> Option<&str> {
        self.return_value.as_deref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn outcome(&self) -> &AttemptOutcome {
        &self.outcome
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }

    pub fn failure(&self) -> Option<&FailureDetail> {
        match &self.outcome {
            AttemptOutcome::Failed(detail) => Some(detail),
            AttemptOutcome::Succeeded => None,
        }
    }

    /// Return value, or stdout when the code set none
    pub fn payload(&self) -> String {
        self.return_value
            .clone()
            .unwrap_or_else(|| self.stdout.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_output_maps_status() {
        let timed_out = SandboxOutput::timed_out(Duration::from_secs(1));
        let attempt = ExecutionAttempt::from_output(1, "x", &timed_out);
        assert_eq!(attempt.failure().unwrap().kind, FailureKind::SandboxTimeout);

        let ok = SandboxOutput::completed("hello\n");
        let attempt = ExecutionAttempt::from_output(2, "x", &ok);
        assert!(attempt.succeeded());
        assert_eq!(attempt.payload(), "hello");
    }

    #[test]
    fn test_failure_kind_from_error() {
        assert_eq!(
            FailureKind::from_error(&Error::malformed("code_generation", "no code")),
            FailureKind::OracleMalformedResponse
        );
        assert_eq!(
            FailureKind::from_error(&Error::SandboxUnavailable("no python".into())),
            FailureKind::SandboxRuntimeFailure
        );
        assert_eq!(FailureKind::from_error(&Error::Cancelled), FailureKind::Cancelled);
    }

    #[test]
    fn test_display() {
        let detail = FailureDetail::new(FailureKind::SandboxTimeout, "timed out after 30000ms");
        assert_eq!(detail.to_string(), "[sandbox_timeout] timed out after 30000ms");
    }
}
