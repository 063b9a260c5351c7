//! Process sandbox
//!
//! Runs code with a local interpreter in a throwaway scratch directory.
//!
//! ## Limits
//!
//! - **Wall clock**: tokio timer, child killed on expiry
//! - **Memory / CPU**: `setrlimit(RLIMIT_AS / RLIMIT_CPU)` in the child (Unix only)
//! - **Cancellation**: `CancellationToken`, child killed on cancel
//!
//! ```ignore
//! let sandbox = ProcessSandbox::new("python3");
//! let output = sandbox.run(SandboxInvocation::new("print(1)"), CancellationToken::new()).await?;
//! ```

use crate::dependencies::{resolve_dependencies, DependencyInstaller};
use crate::harness::{self, parse_output};
use crate::runtime::{ResourceLimits, RunStatus, SandboxInvocation, SandboxOutput, SandboxRuntime};
use async_trait::async_trait;
use skillforge_foundation::{Error, Result, SandboxSettings};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Time allowed for pipe readers to drain after the child exits
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How the wait loop ended
enum WaitOutcome {
    Exited(ExitStatus),
    /// Waiting on the child itself failed
    Lost(std::io::Error),
    TimedOut,
    Cancelled,
}

impl WaitOutcome {
    /// Run status and exit code; a lost child becomes an error
    fn classify(self, memory_error: bool) -> Result<(RunStatus, Option<i32>)> {
        match self {
            WaitOutcome::Exited(status) => Ok(classify_exit(status, memory_error)),
            WaitOutcome::Lost(e) => Err(Error::Io(e)),
            WaitOutcome::TimedOut => Ok((RunStatus::TimedOut, None)),
            WaitOutcome::Cancelled => Ok((RunStatus::Cancelled, None)),
        }
    }
}

// ============================================================================
// ProcessSandbox
// ============================================================================

pub struct ProcessSandbox {
    python: String,
    auto_install: bool,
    installer: DependencyInstaller,
    scratch_root: PathBuf,
    env_passthrough: Vec<String>,
}

impl ProcessSandbox {
    pub fn new(python: impl Into<String>) -> Self {
        let python = python.into();
        Self {
            installer: DependencyInstaller::new(python.clone()),
            python,
            auto_install: true,
            scratch_root: std::env::temp_dir(),
            env_passthrough: vec![
                "PATH".to_string(),
                "HOME".to_string(),
                "LANG".to_string(),
                "VIRTUAL_ENV".to_string(),
                "PYTHONPATH".to_string(),
            ],
        }
    }

    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self::new(settings.python.clone()).with_auto_install(settings.auto_install)
    }

    pub fn with_auto_install(mut self, enabled: bool) -> Self {
        self.auto_install = enabled;
        self
    }

    /// Directory under which per-invocation scratch dirs are created
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn installer(&self) -> &DependencyInstaller {
        &self.installer
    }

    async fn prepare_scratch(&self, code: &str) -> Result<PathBuf> {
        let dir = self
            .scratch_root
            .join(format!("skillforge-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(harness::HARNESS_FILE), harness::harness_source()).await?;
        tokio::fs::write(dir.join(harness::CODE_FILE), code).await?;
        Ok(dir)
    }

    fn build_command(&self, scratch: &Path, cwd: &Path, limits: &ResourceLimits) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg(scratch.join(harness::HARNESS_FILE))
            .arg(scratch.join(harness::CODE_FILE))
            .current_dir(cwd)
            .env_clear()
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for var in &self.env_passthrough {
            if let Ok(val) = std::env::var(var) {
                cmd.env(var, val);
            }
        }

        #[cfg(unix)]
        apply_rlimits(&mut cmd, limits);
        #[cfg(not(unix))]
        let _ = limits;

        cmd
    }
}

#[async_trait]
impl SandboxRuntime for ProcessSandbox {
    async fn run(
        &self,
        invocation: SandboxInvocation,
        cancel: CancellationToken,
    ) -> Result<SandboxOutput> {
        if cancel.is_cancelled() {
            return Ok(SandboxOutput::cancelled());
        }

        let started = Instant::now();

        if self.auto_install {
            let deps = resolve_dependencies(&invocation.code, &invocation.dependencies);
            match self.installer.ensure(&deps, &cancel).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Ok(SandboxOutput::cancelled()),
                Err(Error::SandboxUnavailable(msg)) => return Err(Error::SandboxUnavailable(msg)),
                Err(e) => {
                    let mut output = SandboxOutput::failed(e.to_string());
                    output.duration = started.elapsed();
                    return Ok(output);
                }
            }
        }

        let scratch = self.prepare_scratch(&invocation.code).await?;
        let cwd = invocation.workspace.clone().unwrap_or_else(|| scratch.clone());
        let limits = invocation.limits;

        let mut child = match self.build_command(&scratch, &cwd, &limits).spawn() {
            Ok(child) => child,
            Err(e) => {
                remove_scratch(&scratch).await;
                return Err(Error::SandboxUnavailable(format!(
                    "failed to start {}: {}",
                    self.python, e
                )));
            }
        };

        debug!(
            "Sandbox process started (pid {:?}, timeout {}ms)",
            child.id(),
            limits.timeout.as_millis()
        );

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WaitOutcome::Exited(status),
                Err(e) => WaitOutcome::Lost(e),
            },
            _ = tokio::time::sleep(limits.timeout) => WaitOutcome::TimedOut,
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };

        if !matches!(outcome, WaitOutcome::Exited(_)) {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill sandbox process: {}", e);
            }
            let _ = child.wait().await;
        }

        let raw_stdout = drain(stdout_reader).await;
        let raw_stderr = drain(stderr_reader).await;
        remove_scratch(&scratch).await;

        let parsed = parse_output(&raw_stdout, &raw_stderr);
        let duration = started.elapsed();

        match &outcome {
            WaitOutcome::TimedOut => {
                info!("Sandbox run timed out after {}ms", limits.timeout.as_millis())
            }
            WaitOutcome::Cancelled => info!("Sandbox run cancelled"),
            WaitOutcome::Lost(e) => warn!("Lost track of sandbox process: {}", e),
            WaitOutcome::Exited(_) => {}
        }
        // only after the scratch dir is removed
        let (status, exit_code) = outcome.classify(parsed.memory_error)?;

        let failure_detail = match &status {
            RunStatus::Completed => None,
            RunStatus::TimedOut => Some(format!("timed out after {}ms", limits.timeout.as_millis())),
            RunStatus::Cancelled => Some("cancelled".to_string()),
            RunStatus::ResourceExceeded(what) => Some(what.clone()),
            RunStatus::Failed => Some(
                parsed
                    .traceback
                    .clone()
                    .unwrap_or_else(|| format!("process exited with code {:?}", exit_code)),
            ),
        };

        Ok(SandboxOutput {
            stdout: parsed.stdout,
            stderr: parsed.stderr,
            return_value: parsed.return_value,
            failure_detail,
            exit_code,
            duration,
            status,
        })
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.python)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn spawn_reader<R>(mut reader: R) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        buf
    })
}

/// A grandchild holding the pipe open must not hang the run
async fn drain(reader: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

async fn remove_scratch(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        debug!("Failed to remove scratch dir {}: {}", dir.display(), e);
    }
}

fn classify_exit(status: ExitStatus, memory_error: bool) -> (RunStatus, Option<i32>) {
    if memory_error {
        return (
            RunStatus::ResourceExceeded("memory limit exceeded".to_string()),
            status.code(),
        );
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return match signal {
                libc::SIGXCPU | libc::SIGKILL => (
                    RunStatus::ResourceExceeded(format!("cpu limit exceeded (signal {})", signal)),
                    None,
                ),
                libc::SIGSEGV => (
                    RunStatus::ResourceExceeded("memory limit exceeded (SIGSEGV)".to_string()),
                    None,
                ),
                other => (RunStatus::Failed, Some(128 + other)),
            };
        }
    }

    match status.code() {
        Some(0) => (RunStatus::Completed, Some(0)),
        code => (RunStatus::Failed, code),
    }
}

#[cfg(unix)]
fn apply_rlimits(cmd: &mut Command, limits: &ResourceLimits) {
    let memory = limits.memory_bytes();
    let cpu = limits.cpu_seconds.max(1);

    // SAFETY: the closure only calls async-signal-safe libc functions
    unsafe {
        cmd.pre_exec(move || {
            if memory > 0 {
                lower_limit(libc::RLIMIT_AS as _, memory)?;
            }
            lower_limit(libc::RLIMIT_CPU as _, cpu)?;
            Ok(())
        });
    }
}

/// Lower a resource limit, never above the current hard limit
#[cfg(unix)]
fn lower_limit(resource: i32, value: u64) -> std::io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `current` is a valid, writable rlimit
    if unsafe { libc::getrlimit(resource as _, &mut current) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let value = (value as libc::rlim_t).min(current.rlim_max);
    let next = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    // SAFETY: `next` is a valid rlimit
    if unsafe { libc::setrlimit(resource as _, &next) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
