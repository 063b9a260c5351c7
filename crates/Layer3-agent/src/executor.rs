//! Executor - SubTask 하나를 retrieve → generate → sandbox → repair 루프로 실행
//!
//! 루프는 명시적 상태 머신이고, 전이 함수 [`next_state`] 는 순수 함수다.
//!
//! ```text
//! Retrieve ─► Generate(1) ─► Sandbox(n) ─► Done
//!                 │              │
//!                 │              └─► Repair(n+1) ─► Sandbox(n+1) ...
//!                 └─► Generate(n+1)            (n == max) ─► Exhausted
//! any ── cancel ──► Cancelled
//! ```

use crate::attempt::{ExecutionAttempt, FailureDetail, FailureKind};
use crate::plan::SubTask;
use crate::progress::Journal;
use crate::verification::{VerificationCandidate, VerificationQueue};
use skillforge_foundation::{Error, ExecutorConfig, Result, SimilarityPolicy};
use skillforge_oracle::{OracleClient, SkillContext};
use skillforge_sandbox::{resolve_dependencies, ResourceLimits, SandboxInvocation, SandboxRuntime};
use skillforge_skill::{apply_similarity_policy, SkillIndex};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Retrieve,
    Generate { attempt: u32 },
    Sandbox { attempt: u32 },
    Repair { attempt: u32 },
    Done,
    Exhausted,
    Cancelled,
}

impl ExecState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecState::Done | ExecState::Exhausted | ExecState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecEvent {
    Retrieved,
    /// Oracle produced code
    CodeReady,
    /// Oracle call failed or returned no code
    CodeFailed,
    RunSucceeded,
    RunFailed,
    Cancel,
}

/// Transition table. `max_attempts` bounds attempt numbers.
pub fn next_state(state: ExecState, event: ExecEvent, max_attempts: u32) -> ExecState {
    use ExecEvent::*;
    use ExecState::*;

    if state.is_terminal() {
        return state;
    }
    if event == Cancel {
        return Cancelled;
    }

    let retry = |n: u32, again: fn(u32) -> ExecState| {
        if n < max_attempts {
            again(n + 1)
        } else {
            Exhausted
        }
    };

    match (state, event) {
        (Retrieve, Retrieved) => Generate { attempt: 1 },
        (Generate { attempt }, CodeReady) | (Repair { attempt }, CodeReady) => Sandbox { attempt },
        (Generate { attempt }, CodeFailed) => retry(attempt, |n| Generate { attempt: n }),
        (Repair { attempt }, CodeFailed) => retry(attempt, |n| Repair { attempt: n }),
        (Sandbox { .. }, RunSucceeded) => Done,
        (Sandbox { attempt }, RunFailed) => retry(attempt, |n| Repair { attempt: n }),
        // events that do not apply to the state leave it unchanged
        (state, _) => state,
    }
}

// ============================================================================
// TaskExecutor
// ============================================================================

pub struct TaskExecutor {
    oracle: OracleClient,
    sandbox: Arc<dyn SandboxRuntime>,
    index: Arc<dyn SkillIndex>,
    config: ExecutorConfig,
    similarity: SimilarityPolicy,
    limits: ResourceLimits,
    workspace: Option<PathBuf>,
    verification: Option<VerificationQueue>,
}

/// Oracle call raced against cancellation (`None` = cancelled)
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Option<Result<T>> {
    tokio::select! {
        result = fut => Some(result),
        _ = cancel.cancelled() => None,
    }
}

impl TaskExecutor {
    pub fn new(
        oracle: OracleClient,
        sandbox: Arc<dyn SandboxRuntime>,
        index: Arc<dyn SkillIndex>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            oracle,
            sandbox,
            index,
            config,
            similarity: SimilarityPolicy::default(),
            limits: ResourceLimits::default(),
            workspace: None,
            verification: None,
        }
    }

    pub fn with_similarity(mut self, similarity: SimilarityPolicy) -> Self {
        self.similarity = similarity;
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

    pub fn with_verification(mut self, queue: VerificationQueue) -> Self {
        self.verification = Some(queue);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Skills relevant to `description` that pass the similarity policy
    pub async fn retrieve(&self, description: &str) -> Vec<SkillContext> {
        let scored = match self.index.query(description, self.config.top_k).await {
            Ok(scored) => scored,
            Err(e) => {
                warn!("Skill retrieval failed, generating without context: {}", e);
                return Vec::new();
            }
        };

        let kept = apply_similarity_policy(&self.similarity, scored);
        debug!("Retrieved {} skill(s) for '{}'", kept.len(), description);
        kept.into_iter()
            .map(|s| SkillContext {
                name: s.skill.name,
                description: s.skill.description,
                code: s.skill.code,
                score: s.score,
            })
            .collect()
    }

    /// Run one code version in the sandbox
    pub async fn run_code(&self, number: u32, code: &str, cancel: &CancellationToken) -> ExecutionAttempt {
        let dependencies = package_names(code);
        let invocation = SandboxInvocation::new(code)
            .with_dependencies(dependencies)
            .with_limits(self.limits)
            .with_workspace(self.workspace.clone());

        match self.sandbox.run(invocation, cancel.clone()).await {
            Ok(output) => ExecutionAttempt::from_output(number, code, &output),
            Err(Error::Cancelled) => ExecutionAttempt::failed(number, code, FailureDetail::cancelled()),
            Err(e) => ExecutionAttempt::failed(
                number,
                code,
                FailureDetail::new(FailureKind::SandboxRuntimeFailure, e.to_string()),
            ),
        }
    }

    /// One attempt for `subtask`
    ///
    /// Repairs the last failed attempt's code if there is one, otherwise
    /// generates fresh code. The SubTask itself is not modified.
    pub async fn execute(&self, subtask: &SubTask, cancel: &CancellationToken) -> ExecutionAttempt {
        let number = subtask.attempts().len() as u32 + 1;
        if cancel.is_cancelled() {
            return ExecutionAttempt::failed(number, "", FailureDetail::cancelled());
        }

        // attempts that never got code from the oracle carry nothing to repair
        let previous = subtask
            .attempts()
            .iter()
            .rev()
            .take_while(|a| !a.succeeded())
            .find_map(|a| a.failure().filter(|f| !f.kind.is_oracle()).map(|f| (a.code(), f)))
            .filter(|(code, _)| !code.is_empty());

        let code = match previous {
            Some((prev_code, failure)) => {
                unless_cancelled(
                    cancel,
                    self.oracle
                        .repair_code(subtask.description(), prev_code, &failure.message),
                )
                .await
            }
            None => {
                let skills = self.retrieve(subtask.description()).await;
                unless_cancelled(
                    cancel,
                    self.oracle
                        .generate_code(subtask.description(), subtask.code_hint(), &skills),
                )
                .await
            }
        };

        match code {
            None => ExecutionAttempt::failed(number, "", FailureDetail::cancelled()),
            Some(Err(e)) => ExecutionAttempt::failed(number, "", FailureDetail::from_error(&e)),
            Some(Ok(code)) => self.run_code(number, &code, cancel).await,
        }
    }

    /// Drive `subtask` to a terminal status
    pub async fn run(&self, subtask: SubTask, cancel: CancellationToken) -> SubTask {
        let journal = Journal::new(&subtask);
        self.run_with_journal(subtask, cancel, &journal).await
    }

    /// [`run`](Self::run), publishing every change of the SubTask to `journal`
    pub async fn run_with_journal(
        &self,
        mut subtask: SubTask,
        cancel: CancellationToken,
        journal: &Journal,
    ) -> SubTask {
        if let Err(e) = subtask.start() {
            warn!("{}", e);
            return subtask;
        }
        journal.publish(&subtask);

        let max_attempts = self.config.max_attempts();
        let mut state = ExecState::Retrieve;
        let mut skills: Vec<SkillContext> = Vec::new();
        let mut code = String::new();
        let mut last_failure: Option<FailureDetail> = None;
        // what the next repair is asked to fix; oracle errors never replace it
        let mut run_failure: Option<FailureDetail> = None;
        let mut payload = String::new();
        let mut original_stdout = String::new();

        while !state.is_terminal() {
            if cancel.is_cancelled() {
                state = next_state(state, ExecEvent::Cancel, max_attempts);
                continue;
            }

            let event = match state {
                ExecState::Retrieve => {
                    skills = self.retrieve(subtask.description()).await;
                    ExecEvent::Retrieved
                }
                ExecState::Generate { attempt } | ExecState::Repair { attempt } => {
                    let reply = match (state, &run_failure) {
                        (ExecState::Repair { .. }, Some(failure)) => {
                            debug!("[{}] Repairing for attempt {}", subtask.id(), attempt);
                            unless_cancelled(
                                &cancel,
                                self.oracle
                                    .repair_code(subtask.description(), &code, &failure.message),
                            )
                            .await
                        }
                        _ => {
                            unless_cancelled(
                                &cancel,
                                self.oracle.generate_code(
                                    subtask.description(),
                                    subtask.code_hint(),
                                    &skills,
                                ),
                            )
                            .await
                        }
                    };
                    match reply {
                        None => ExecEvent::Cancel,
                        Some(Ok(new_code)) => {
                            code = new_code;
                            ExecEvent::CodeReady
                        }
                        Some(Err(e)) => {
                            let detail = FailureDetail::from_error(&e);
                            warn!("[{}] Attempt {} got no code: {}", subtask.id(), attempt, detail);
                            record(
                                &mut subtask,
                                ExecutionAttempt::failed(attempt, code.clone(), detail.clone()),
                                journal,
                            );
                            last_failure = Some(detail);
                            ExecEvent::CodeFailed
                        }
                    }
                }
                ExecState::Sandbox { attempt } => {
                    let result = self.run_code(attempt, &code, &cancel).await;
                    let event = match result.failure() {
                        None => {
                            info!("[{}] Attempt {} succeeded", subtask.id(), attempt);
                            payload = result.payload();
                            original_stdout = result.stdout().to_string();
                            ExecEvent::RunSucceeded
                        }
                        Some(detail) if detail.kind == FailureKind::Cancelled => ExecEvent::Cancel,
                        Some(detail) => {
                            warn!("[{}] Attempt {} failed: {}", subtask.id(), attempt, detail);
                            last_failure = Some(detail.clone());
                            run_failure = Some(detail.clone());
                            ExecEvent::RunFailed
                        }
                    };
                    record(&mut subtask, result, journal);
                    event
                }
                ExecState::Done | ExecState::Exhausted | ExecState::Cancelled => break,
            };

            state = next_state(state, event, max_attempts);
        }

        let finished = match state {
            ExecState::Done => {
                let finished = subtask.succeed(payload.clone());
                self.submit_for_verification(&subtask, &code, payload, original_stdout);
                finished
            }
            ExecState::Cancelled => {
                info!("[{}] Cancelled", subtask.id());
                subtask.fail(FailureDetail::cancelled())
            }
            _ => {
                let detail = last_failure
                    .unwrap_or_else(|| FailureDetail::internal("no attempt was made"));
                warn!(
                    "[{}] Failed after {} attempt(s): {}",
                    subtask.id(),
                    subtask.attempts().len(),
                    detail
                );
                subtask.fail(detail)
            }
        };
        if let Err(e) = finished {
            warn!("{}", e);
        }

        journal.publish(&subtask);
        subtask
    }

    fn submit_for_verification(&self, subtask: &SubTask, code: &str, output: String, stdout: String) {
        let Some(queue) = &self.verification else {
            return;
        };
        queue.submit(VerificationCandidate {
            subtask_id: subtask.id().clone(),
            description: subtask.description().to_string(),
            code: code.to_string(),
            dependencies: package_names(code),
            original_output: output,
            original_stdout: stdout,
        });
    }
}

fn package_names(code: &str) -> Vec<String> {
    resolve_dependencies(code, &[])
        .into_iter()
        .map(|d| d.package)
        .collect()
}

fn record(subtask: &mut SubTask, attempt: ExecutionAttempt, journal: &Journal) {
    match subtask.record_attempt(attempt) {
        Ok(()) => journal.publish(subtask),
        Err(e) => warn!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{SubTaskId, SubTaskStatus};
    use skillforge_oracle::{CallSite, RetryConfig, ScriptedOracle};
    use skillforge_sandbox::{ScriptedRun, ScriptedSandbox};
    use skillforge_skill::{InMemorySkillIndex, Skill};
    use std::time::Duration;

    const MAX: u32 = 3;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = ExecState::Retrieve;
        for event in [ExecEvent::Retrieved, ExecEvent::CodeReady, ExecEvent::RunSucceeded] {
            state = next_state(state, event, MAX);
        }
        assert_eq!(state, ExecState::Done);
    }

    #[test]
    fn test_run_failure_goes_to_repair_until_exhausted() {
        let s = next_state(ExecState::Sandbox { attempt: 1 }, ExecEvent::RunFailed, MAX);
        assert_eq!(s, ExecState::Repair { attempt: 2 });
        let s = next_state(s, ExecEvent::CodeReady, MAX);
        assert_eq!(s, ExecState::Sandbox { attempt: 2 });
        let s = next_state(ExecState::Sandbox { attempt: 3 }, ExecEvent::RunFailed, MAX);
        assert_eq!(s, ExecState::Exhausted);
    }

    #[test]
    fn test_code_failures_consume_attempts() {
        assert_eq!(
            next_state(ExecState::Generate { attempt: 1 }, ExecEvent::CodeFailed, MAX),
            ExecState::Generate { attempt: 2 }
        );
        assert_eq!(
            next_state(ExecState::Repair { attempt: 2 }, ExecEvent::CodeFailed, MAX),
            ExecState::Repair { attempt: 3 }
        );
        assert_eq!(
            next_state(ExecState::Repair { attempt: 3 }, ExecEvent::CodeFailed, MAX),
            ExecState::Exhausted
        );
        assert_eq!(
            next_state(ExecState::Generate { attempt: 1 }, ExecEvent::CodeFailed, 1),
            ExecState::Exhausted
        );
    }

    #[test]
    fn test_cancel_and_terminal_states() {
        for state in [
            ExecState::Retrieve,
            ExecState::Generate { attempt: 1 },
            ExecState::Sandbox { attempt: 2 },
            ExecState::Repair { attempt: 2 },
        ] {
            assert_eq!(next_state(state, ExecEvent::Cancel, MAX), ExecState::Cancelled);
        }
        assert_eq!(next_state(ExecState::Done, ExecEvent::Cancel, MAX), ExecState::Done);
        assert_eq!(
            next_state(ExecState::Exhausted, ExecEvent::Retrieved, MAX),
            ExecState::Exhausted
        );
    }

    fn executor(oracle: ScriptedOracle, sandbox: ScriptedSandbox) -> TaskExecutor {
        let client = OracleClient::new(Arc::new(oracle))
            .with_retry(RetryConfig::no_retry())
            .with_malformed_retries(0);
        TaskExecutor::new(
            client,
            Arc::new(sandbox),
            Arc::new(InMemorySkillIndex::default()),
            ExecutorConfig::default(),
        )
    }

    fn task() -> SubTask {
        SubTask::new(SubTaskId::numbered(1), "Calculate pi")
    }

    #[tokio::test]
    async fn test_run_succeeds_first_try() {
        let oracle = ScriptedOracle::new()
            .with_reply(CallSite::CodeGeneration, "```python\nresult = 3.14159\n```");
        let sandbox = ScriptedSandbox::new().otherwise(ScriptedRun::returning("", "3.14159"));
        let done = executor(oracle, sandbox).run(task(), CancellationToken::new()).await;

        assert_eq!(done.status(), SubTaskStatus::Succeeded);
        assert_eq!(done.result(), Some("3.14159"));
        assert_eq!(done.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_runtime_failure_is_repaired() {
        let oracle = ScriptedOracle::new()
            .with_reply(CallSite::CodeGeneration, "```python\nprint(1/0)\n```")
            .with_reply(CallSite::CodeRepair, "```python\nprint(1)\n```");
        let sandbox = ScriptedSandbox::new()
            .when("1/0", ScriptedRun::Fail("ZeroDivisionError".into()))
            .otherwise(ScriptedRun::ok("1\n"));
        let oracle = Arc::new(oracle);
        let client = OracleClient::new(oracle.clone()).with_retry(RetryConfig::no_retry());
        let executor = TaskExecutor::new(
            client,
            Arc::new(sandbox),
            Arc::new(InMemorySkillIndex::default()),
            ExecutorConfig::default(),
        );
        let done = executor.run(task(), CancellationToken::new()).await;

        assert_eq!(done.status(), SubTaskStatus::Succeeded);
        assert_eq!(done.attempts().len(), 2);
        let repair = &oracle.calls()[1];
        assert_eq!(repair.call_site, CallSite::CodeRepair);
        assert!(repair.prompt.contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_repair_after_malformed_reply_still_sees_traceback() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_reply(CallSite::CodeGeneration, "```python\nprint(1/0)\n```")
                .with_reply(CallSite::CodeRepair, "no code here, sorry")
                .with_reply(CallSite::CodeRepair, "```python\nprint(1)\n```"),
        );
        let sandbox = ScriptedSandbox::new()
            .when("1/0", ScriptedRun::Fail("ZeroDivisionError: division by zero".into()))
            .otherwise(ScriptedRun::ok("1\n"));
        let executor = TaskExecutor::new(
            OracleClient::new(oracle.clone())
                .with_retry(RetryConfig::no_retry())
                .with_malformed_retries(0),
            Arc::new(sandbox),
            Arc::new(InMemorySkillIndex::default()),
            ExecutorConfig::default(),
        );
        let done = executor.run(task(), CancellationToken::new()).await;

        assert_eq!(done.status(), SubTaskStatus::Succeeded);
        assert_eq!(done.attempts().len(), 3);
        let repairs: Vec<_> = oracle
            .calls()
            .into_iter()
            .filter(|r| r.call_site == CallSite::CodeRepair)
            .collect();
        assert_eq!(repairs.len(), 2);
        assert!(repairs[1].prompt.contains("ZeroDivisionError"));
        assert!(!repairs[1].prompt.contains("Malformed"));
    }

    #[tokio::test]
    async fn test_execute_skips_oracle_failures_when_repairing() {
        let oracle = Arc::new(
            ScriptedOracle::new().with_reply(CallSite::CodeRepair, "```python\nprint(2)\n```"),
        );
        let executor = TaskExecutor::new(
            OracleClient::new(oracle.clone()).with_retry(RetryConfig::no_retry()),
            Arc::new(ScriptedSandbox::new()),
            Arc::new(InMemorySkillIndex::default()),
            ExecutorConfig::default(),
        );
        let mut subtask = task();
        subtask
            .record_attempt(ExecutionAttempt::failed(
                1,
                "print(1/0)",
                FailureDetail::new(FailureKind::SandboxRuntimeFailure, "ZeroDivisionError"),
            ))
            .unwrap();
        subtask
            .record_attempt(ExecutionAttempt::failed(
                2,
                "print(1/0)",
                FailureDetail::new(FailureKind::OracleMalformedResponse, "reply contains no code"),
            ))
            .unwrap();

        let third = executor.execute(&subtask, &CancellationToken::new()).await;
        assert!(third.succeeded());
        assert_eq!(third.number(), 3);
        assert!(oracle.calls()[0].prompt.contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_last_failure() {
        let oracle = ScriptedOracle::new()
            .with_default(CallSite::CodeGeneration, "```python\nboom()\n```")
            .with_default(CallSite::CodeRepair, "```python\nboom()\n```");
        let sandbox = ScriptedSandbox::new().otherwise(ScriptedRun::Fail("NameError: boom".into()));
        let done = executor(oracle, sandbox).run(task(), CancellationToken::new()).await;

        assert_eq!(done.status(), SubTaskStatus::Failed);
        assert_eq!(done.attempts().len(), 3);
        let error = done.error().unwrap();
        assert_eq!(error.kind, FailureKind::SandboxRuntimeFailure);
        assert!(error.message.contains("NameError"));
    }

    #[tokio::test]
    async fn test_malformed_generation_counts_as_attempt() {
        let oracle = ScriptedOracle::new()
            .with_reply(CallSite::CodeGeneration, "I'd rather not.")
            .with_reply(CallSite::CodeGeneration, "```python\nprint(2)\n```");
        let sandbox = ScriptedSandbox::new();
        let done = executor(oracle, sandbox).run(task(), CancellationToken::new()).await;

        assert_eq!(done.status(), SubTaskStatus::Succeeded);
        assert_eq!(done.attempts().len(), 2);
        assert_eq!(
            done.attempts()[0].failure().unwrap().kind,
            FailureKind::OracleMalformedResponse
        );
    }

    #[tokio::test]
    async fn test_unavailable_runtime_is_recorded() {
        let oracle = ScriptedOracle::new()
            .with_default(CallSite::CodeGeneration, "```python\nprint(1)\n```")
            .with_default(CallSite::CodeRepair, "```python\nprint(1)\n```");
        let sandbox = ScriptedSandbox::new().otherwise(ScriptedRun::Unavailable("no python".into()));
        let done = executor(oracle, sandbox).run(task(), CancellationToken::new()).await;

        assert_eq!(done.status(), SubTaskStatus::Failed);
        assert_eq!(done.attempts().len(), 3);
        assert_eq!(done.error().unwrap().kind, FailureKind::SandboxRuntimeFailure);
    }

    #[tokio::test]
    async fn test_cancel_during_sandbox() {
        let oracle = ScriptedOracle::new().with_default(CallSite::CodeGeneration, "```python\nwhile True: pass\n```");
        let sandbox = ScriptedSandbox::new().otherwise(ScriptedRun::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let done = executor(oracle, sandbox).run(task(), cancel).await;

        assert_eq!(done.status(), SubTaskStatus::Failed);
        assert!(done.is_cancelled());
    }

    #[tokio::test]
    async fn test_retrieved_skills_reach_prompt() {
        let index = Arc::new(InMemorySkillIndex::default());
        index
            .upsert(Skill::new("calculate-pi", "Calculate pi digits", "print(3.14)"))
            .await
            .unwrap();
        let oracle = Arc::new(
            ScriptedOracle::new().with_reply(CallSite::CodeGeneration, "```python\nprint(3.14)\n```"),
        );
        let executor = TaskExecutor::new(
            OracleClient::new(oracle.clone()).with_retry(RetryConfig::no_retry()),
            Arc::new(ScriptedSandbox::new()),
            index,
            ExecutorConfig::default(),
        )
        .with_similarity(SimilarityPolicy::Absolute { min_score: 0.1 });

        executor.run(task(), CancellationToken::new()).await;
        assert!(oracle.calls()[0].prompt.contains("### calculate-pi"));
    }

    #[tokio::test]
    async fn test_execute_single_attempt_then_repair() {
        let oracle = ScriptedOracle::new()
            .with_reply(CallSite::CodeGeneration, "```python\nslow()\n```")
            .with_reply(CallSite::CodeRepair, "```python\nfast()\n```");
        let sandbox = ScriptedSandbox::new()
            .when("slow", ScriptedRun::TimeOut)
            .otherwise(ScriptedRun::ok("done"));
        let executor = executor(oracle, sandbox);
        let cancel = CancellationToken::new();

        let mut subtask = task();
        let first = executor.execute(&subtask, &cancel).await;
        assert_eq!(first.failure().unwrap().kind, FailureKind::SandboxTimeout);
        subtask.record_attempt(first).unwrap();

        let second = executor.execute(&subtask, &cancel).await;
        assert!(second.succeeded());
        assert_eq!(second.number(), 2);
        assert_eq!(second.code(), "fast()");
    }
}
