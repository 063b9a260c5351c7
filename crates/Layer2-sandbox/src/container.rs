//! Container sandbox - runs code in a throwaway Docker container
//!
//! ## Isolation
//!
//! - memory ceiling and swap = `HostConfig.memory`
//! - one CPU via `nano_cpus`, CPU seconds via `ulimit -t`
//! - pids limit 256
//! - no network unless dependencies must be installed
//! - container is force-removed after every run, including timeout and cancel

use crate::dependencies::resolve_dependencies;
use crate::harness::{self, parse_output};
use crate::runtime::{RunStatus, SandboxInvocation, SandboxOutput, SandboxRuntime};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use skillforge_foundation::{Error, Result, SandboxSettings};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default container image
const DEFAULT_IMAGE: &str = "python:3.12-slim";

/// Mount point of the per-run scratch dir
const SCRATCH_MOUNT: &str = "/sandbox";
/// Mount point of the shared workspace
const WORKSPACE_MOUNT: &str = "/workspace";

const PIDS_LIMIT: i64 = 256;

enum WaitOutcome {
    Exited(i64),
    TimedOut,
    Cancelled,
}

pub struct ContainerSandbox {
    docker: Option<Docker>,
    image: String,
    scratch_root: PathBuf,
}

impl ContainerSandbox {
    /// Connects to the local Docker daemon; failures surface on first use
    pub fn new(image: impl Into<String>) -> Self {
        let docker = match Docker::connect_with_local_defaults() {
            Ok(docker) => Some(docker),
            Err(e) => {
                warn!("Docker client unavailable: {}", e);
                None
            }
        };

        Self {
            docker,
            image: image.into(),
            scratch_root: std::env::temp_dir(),
        }
    }

    pub fn from_settings(settings: &SandboxSettings) -> Self {
        let image = if settings.image.is_empty() {
            DEFAULT_IMAGE.to_string()
        } else {
            settings.image.clone()
        };
        Self::new(image)
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    fn docker(&self) -> Result<&Docker> {
        self.docker
            .as_ref()
            .ok_or_else(|| Error::SandboxUnavailable("Docker is not available".to_string()))
    }

    async fn prepare_scratch(&self, code: &str) -> Result<PathBuf> {
        let dir = self
            .scratch_root
            .join(format!("skillforge-ct-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(harness::HARNESS_FILE), harness::harness_source()).await?;
        tokio::fs::write(dir.join(harness::CODE_FILE), code).await?;
        Ok(dir)
    }

    fn container_config(
        &self,
        invocation: &SandboxInvocation,
        scratch: &Path,
        packages: &[String],
    ) -> Config<String> {
        let mut binds = vec![format!("{}:{}:ro", scratch.display(), SCRATCH_MOUNT)];
        if let Some(workspace) = &invocation.workspace {
            binds.push(format!("{}:{}:rw", workspace.display(), WORKSPACE_MOUNT));
        }

        let memory = invocation.limits.memory_bytes().min(i64::MAX as u64) as i64;
        let network_mode = if packages.is_empty() { "none" } else { "bridge" };

        Config {
            image: Some(self.image.clone()),
            working_dir: Some(if invocation.workspace.is_some() {
                WORKSPACE_MOUNT.to_string()
            } else {
                "/tmp".to_string()
            }),
            env: Some(vec![
                "PYTHONUNBUFFERED=1".to_string(),
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
            ]),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                shell_script(invocation.limits.cpu_seconds, packages),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(binds),
                memory: (memory > 0).then_some(memory),
                memory_swap: (memory > 0).then_some(memory),
                nano_cpus: Some(1_000_000_000),
                pids_limit: Some(PIDS_LIMIT),
                network_mode: Some(network_mode.to_string()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn collect_logs(&self, docker: &Docker, id: &str) -> (String, String) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        let mut stream = Box::pin(docker.logs(id, Some(options)));
        let mut stdout = String::new();
        let mut stderr = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message))
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message))
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Log stream ended: {}", e);
                    break;
                }
            }
        }

        (stdout, stderr)
    }

    async fn oom_killed(&self, docker: &Docker, id: &str) -> bool {
        docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|state| state.oom_killed)
            .unwrap_or(false)
    }

    async fn remove(&self, docker: &Docker, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = docker.remove_container(id, Some(options)).await {
            warn!("Failed to remove container {}: {}", id, e);
        }
    }
}

#[async_trait]
impl SandboxRuntime for ContainerSandbox {
    async fn run(
        &self,
        invocation: SandboxInvocation,
        cancel: CancellationToken,
    ) -> Result<SandboxOutput> {
        if cancel.is_cancelled() {
            return Ok(SandboxOutput::cancelled());
        }
        let docker = self.docker()?;
        let started = Instant::now();

        let packages: Vec<String> = resolve_dependencies(&invocation.code, &invocation.dependencies)
            .into_iter()
            .map(|d| d.package)
            .collect();

        let scratch = self.prepare_scratch(&invocation.code).await?;
        let config = self.container_config(&invocation, &scratch, &packages);
        let name = format!("skillforge-{}", Uuid::new_v4().simple());

        let created = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await;
        let id = match created {
            Ok(response) => response.id,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return Err(Error::SandboxUnavailable(format!(
                    "Failed to create container: {}",
                    e
                )));
            }
        };

        if let Err(e) = docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            self.remove(docker, &id).await;
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            return Err(Error::SandboxRuntime(format!(
                "Failed to start container: {}",
                e
            )));
        }

        debug!("Container {} started for sandbox run", name);

        let timeout = invocation.limits.timeout;
        let outcome = {
            let mut wait = Box::pin(docker.wait_container(&id, None::<WaitContainerOptions<String>>));
            tokio::select! {
                item = wait.next() => match item {
                    Some(Ok(response)) => WaitOutcome::Exited(response.status_code),
                    Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                        WaitOutcome::Exited(code)
                    }
                    Some(Err(e)) => {
                        self.remove(docker, &id).await;
                        let _ = tokio::fs::remove_dir_all(&scratch).await;
                        return Err(Error::SandboxRuntime(format!("Failed to wait for container: {}", e)));
                    }
                    None => WaitOutcome::Exited(-1),
                },
                _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
                _ = cancel.cancelled() => WaitOutcome::Cancelled,
            }
        };

        let (raw_stdout, raw_stderr) = self.collect_logs(docker, &id).await;
        let oom = matches!(outcome, WaitOutcome::Exited(_)) && self.oom_killed(docker, &id).await;
        self.remove(docker, &id).await;
        let _ = tokio::fs::remove_dir_all(&scratch).await;

        let parsed = parse_output(&raw_stdout, &raw_stderr);
        let (status, exit_code, failure_detail) = match outcome {
            WaitOutcome::TimedOut => {
                info!("Container run timed out after {}ms", timeout.as_millis());
                (
                    RunStatus::TimedOut,
                    None,
                    Some(format!("timed out after {}ms", timeout.as_millis())),
                )
            }
            WaitOutcome::Cancelled => (RunStatus::Cancelled, None, Some("cancelled".to_string())),
            WaitOutcome::Exited(_) if oom || parsed.memory_error => (
                RunStatus::ResourceExceeded("memory limit exceeded".to_string()),
                Some(137),
                Some("memory limit exceeded".to_string()),
            ),
            WaitOutcome::Exited(0) => (RunStatus::Completed, Some(0), None),
            WaitOutcome::Exited(code) => {
                let code = code as i32;
                // 152 = 128 + SIGXCPU from `ulimit -t`
                if code == 152 {
                    (
                        RunStatus::ResourceExceeded("cpu limit exceeded".to_string()),
                        Some(code),
                        Some("cpu limit exceeded".to_string()),
                    )
                } else {
                    let detail = parsed
                        .traceback
                        .clone()
                        .unwrap_or_else(|| format!("container exited with code {}", code));
                    (RunStatus::Failed, Some(code), Some(detail))
                }
            }
        };

        Ok(SandboxOutput {
            stdout: parsed.stdout,
            stderr: parsed.stderr,
            return_value: parsed.return_value,
            failure_detail,
            exit_code,
            duration: started.elapsed(),
            status,
        })
    }

    async fn is_available(&self) -> bool {
        match &self.docker {
            Some(docker) => docker.ping().await.is_ok(),
            None => false,
        }
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

/// Shell command run inside the container
fn shell_script(cpu_seconds: u64, packages: &[String]) -> String {
    let mut script = format!("ulimit -t {}; ", cpu_seconds.max(1));
    if !packages.is_empty() {
        let quoted: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        script.push_str(&format!(
            "pip install --quiet --disable-pip-version-check {} 1>&2 || exit 97; ",
            quoted.join(" ")
        ));
    }
    script.push_str(&format!(
        "exec python {mount}/{harness} {mount}/{code}",
        mount = SCRATCH_MOUNT,
        harness = harness::HARNESS_FILE,
        code = harness::CODE_FILE
    ));
    script
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
