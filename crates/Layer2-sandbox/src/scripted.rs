//! Deterministic runtime
//!
//! Chooses an outcome by matching substrings of the submitted code, without
//! running anything. Used by test suites of the orchestration layers.

use crate::runtime::{SandboxInvocation, SandboxOutput, SandboxRuntime, RunStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use skillforge_foundation::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Complete {
        stdout: String,
        return_value: Option<String>,
    },
    Fail(String),
    /// Reported as a timeout immediately
    TimeOut,
    ResourceExceeded(String),
    /// Blocks until cancelled
    Hang,
    /// The runtime itself is unusable (`Err`)
    Unavailable(String),
}

impl ScriptedRun {
    pub fn ok(stdout: impl Into<String>) -> Self {
        ScriptedRun::Complete {
            stdout: stdout.into(),
            return_value: None,
        }
    }

    pub fn returning(stdout: impl Into<String>, value: impl Into<String>) -> Self {
        ScriptedRun::Complete {
            stdout: stdout.into(),
            return_value: Some(value.into()),
        }
    }
}

pub struct ScriptedSandbox {
    rules: Vec<(String, ScriptedRun)>,
    fallback: ScriptedRun,
    delay: Duration,
    invocations: Mutex<Vec<SandboxInvocation>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for ScriptedSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: ScriptedRun::ok("ok"),
            delay: Duration::ZERO,
            invocations: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Outcome for code containing `pattern` (first matching rule wins)
    pub fn when(mut self, pattern: impl Into<String>, run: ScriptedRun) -> Self {
        self.rules.push((pattern.into(), run));
        self
    }

    /// Outcome when no rule matches
    pub fn otherwise(mut self, run: ScriptedRun) -> Self {
        self.fallback = run;
        self
    }

    /// Simulated execution time
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> Vec<SandboxInvocation> {
        self.invocations.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Highest number of simultaneous runs observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, code: &str) -> ScriptedRun {
        self.rules
            .iter()
            .find(|(pattern, _)| code.contains(pattern.as_str()))
            .map(|(_, run)| run.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedSandbox {
    async fn run(
        &self,
        invocation: SandboxInvocation,
        cancel: CancellationToken,
    ) -> Result<SandboxOutput> {
        let run = self.outcome_for(&invocation.code);
        let timeout = invocation.limits.timeout;
        self.invocations.lock().push(invocation);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Ok(SandboxOutput::cancelled()),
            }
        }

        let output = match run {
            ScriptedRun::Complete { stdout, return_value } => SandboxOutput {
                return_value,
                duration: self.delay,
                ..SandboxOutput::completed(stdout)
            },
            ScriptedRun::Fail(detail) => SandboxOutput {
                stderr: detail.clone(),
                ..SandboxOutput::failed(detail)
            },
            ScriptedRun::TimeOut => SandboxOutput::timed_out(timeout),
            ScriptedRun::ResourceExceeded(what) => SandboxOutput {
                status: RunStatus::ResourceExceeded(what.clone()),
                ..SandboxOutput::failed(what)
            },
            ScriptedRun::Hang => {
                cancel.cancelled().await;
                SandboxOutput::cancelled()
            }
            ScriptedRun::Unavailable(reason) => return Err(Error::SandboxUnavailable(reason)),
        };
        Ok(output)
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_and_fallback() {
        let sandbox = ScriptedSandbox::new()
            .when("boom", ScriptedRun::Fail("ValueError".into()))
            .otherwise(ScriptedRun::returning("printed", "42"));

        let cancel = CancellationToken::new();
        let failed = sandbox
            .run(SandboxInvocation::new("boom()"), cancel.clone())
            .await
            .unwrap();
        assert_eq!(failed.status, RunStatus::Failed);

        let ok = sandbox.run(SandboxInvocation::new("x = 1"), cancel).await.unwrap();
        assert_eq!(ok.payload(), "42");
        assert_eq!(sandbox.run_count(), 2);
    }

    #[tokio::test]
    async fn test_hang_until_cancelled() {
        let sandbox = ScriptedSandbox::new().otherwise(ScriptedRun::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let out = sandbox.run(SandboxInvocation::new("x"), cancel).await.unwrap();
        assert_eq!(out.status, RunStatus::Cancelled);
        assert_eq!(sandbox.peak_concurrency(), 1);
    }
}
