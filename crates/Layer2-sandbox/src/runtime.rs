//! Sandbox runtime trait and invocation types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skillforge_foundation::{Error, Result, SandboxSettings};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Resource Limits
// ============================================================================

/// Hard limits enforced by the runtime for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock timeout
    pub timeout: Duration,
    /// Memory ceiling in MiB
    pub memory_mb: u64,
    /// CPU time in seconds
    pub cpu_seconds: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_mb: 512,
            cpu_seconds: 60,
        }
    }
}

impl ResourceLimits {
    /// Limits for quick checks
    pub fn minimal() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_mb: 256,
            cpu_seconds: 5,
        }
    }

    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            memory_mb: settings.memory_mb,
            cpu_seconds: settings.cpu_seconds,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }
}

// ============================================================================
// Invocation / Output
// ============================================================================

/// One code unit to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInvocation {
    pub code: String,
    /// Declared third-party packages (merged with detected imports)
    pub dependencies: Vec<String>,
    pub limits: ResourceLimits,
    /// Explicitly shared workspace mount
    pub workspace: Option<PathBuf>,
}

impl SandboxInvocation {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            dependencies: Vec::new(),
            limits: ResourceLimits::default(),
            workspace: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_workspace(mut self, workspace: Option<PathBuf>) -> Self {
        self.workspace = workspace;
        self
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    /// Exited with status 0 and raised nothing
    Completed,
    /// Raised an exception or exited non-zero
    Failed,
    TimedOut,
    ResourceExceeded(String),
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// Captured result of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    /// Value of the top-level `result` variable, if the code set one
    pub return_value: Option<String>,
    /// Traceback or other failure description
    pub failure_detail: Option<String>,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub status: RunStatus,
}

impl SandboxOutput {
    pub fn completed(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            return_value: None,
            failure_detail: None,
            exit_code: Some(0),
            duration: Duration::ZERO,
            status: RunStatus::Completed,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            failure_detail: Some(detail.into()),
            exit_code: Some(1),
            duration: Duration::ZERO,
            status: RunStatus::Failed,
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            status: RunStatus::TimedOut,
            exit_code: None,
            failure_detail: Some(format!("timed out after {}ms", timeout.as_millis())),
            duration: timeout,
            ..Self::failed("")
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: RunStatus::Cancelled,
            exit_code: None,
            failure_detail: Some("cancelled".to_string()),
            ..Self::failed("")
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Payload handed back to the caller on success
    pub fn payload(&self) -> String {
        self.return_value
            .clone()
            .unwrap_or_else(|| self.stdout.trim_end().to_string())
    }

    /// Failure text used as repair context
    pub fn failure_context(&self) -> String {
        let mut context = String::new();
        if let Some(detail) = &self.failure_detail {
            context.push_str(detail.trim());
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() && !context.contains(stderr) {
            if !context.is_empty() {
                context.push_str("\n--- stderr ---\n");
            }
            context.push_str(stderr);
        }
        if context.is_empty() {
            context = format!("exit code {:?}", self.exit_code);
        }
        context
    }

    /// Map a non-successful run onto the error taxonomy
    pub fn error(&self, limits: &ResourceLimits) -> Option<Error> {
        match &self.status {
            RunStatus::Completed => None,
            RunStatus::Failed => Some(Error::SandboxRuntime(self.failure_context())),
            RunStatus::TimedOut => Some(Error::SandboxTimeout {
                timeout: limits.timeout,
            }),
            RunStatus::ResourceExceeded(what) => {
                Some(Error::SandboxResourceExceeded(what.clone()))
            }
            RunStatus::Cancelled => Some(Error::Cancelled),
        }
    }
}

// ============================================================================
// SandboxRuntime trait
// ============================================================================

/// Sandboxed runtime - implement to add new isolation backends
///
/// `Ok` carries every observable outcome of the code, including timeouts and
/// crashes. `Err` is reserved for the runtime itself being unusable.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Run one code unit. Cancelling `cancel` kills the run on a best-effort basis.
    async fn run(
        &self,
        invocation: SandboxInvocation,
        cancel: CancellationToken,
    ) -> Result<SandboxOutput>;

    /// Check if the backend can run code at all
    async fn is_available(&self) -> bool;

    /// Get runtime name
    fn name(&self) -> &'static str;
}
