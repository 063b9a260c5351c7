//! # skillforge-sandbox
//!
//! Sandboxed code runtime for SkillForge.
//!
//! - [`SandboxRuntime`]: one code unit per invocation, hard CPU/memory/time limits
//! - [`ProcessSandbox`]: local interpreter + rlimits
//! - [`ContainerSandbox`]: throwaway Docker container (bollard)
//! - [`ScriptedSandbox`]: deterministic stand-in for tests
//! - dependency detection / installation before execution
//!
//! ## Output contract
//!
//! ```text
//! SandboxInvocation { code, dependencies, limits, workspace }
//!         │
//!         ▼
//! SandboxOutput { stdout, stderr, return_value, failure_detail,
//!                 exit_code, duration, status }
//!
//! status: Completed | Failed | TimedOut | ResourceExceeded | Cancelled
//! ```

pub mod container;
pub mod dependencies;
pub mod harness;
pub mod process;
pub mod runtime;
pub mod scripted;

use skillforge_foundation::{SandboxKind, SandboxSettings};
use std::sync::Arc;

pub use container::ContainerSandbox;
pub use dependencies::{detect_imports, resolve_dependencies, Dependency, DependencyInstaller};
pub use process::ProcessSandbox;
pub use runtime::{ResourceLimits, RunStatus, SandboxInvocation, SandboxOutput, SandboxRuntime};
pub use scripted::{ScriptedRun, ScriptedSandbox};

/// Build the runtime selected in settings
pub fn build_runtime(settings: &SandboxSettings) -> Arc<dyn SandboxRuntime> {
    match settings.kind {
        SandboxKind::Process => Arc::new(ProcessSandbox::from_settings(settings)),
        SandboxKind::Container => Arc::new(ContainerSandbox::from_settings(settings)),
    }
}
