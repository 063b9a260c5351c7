//! Plan / SubTask 모델
//!
//! SubTask 는 자신을 맡은 Executor 만 변경하며, 종료 상태(Succeeded/Failed)에서는
//! 더 이상 전이하지 않는다.

use crate::attempt::{ExecutionAttempt, FailureDetail, FailureKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillforge_foundation::{Error, Request, RequestId, Result};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// SubTask
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubTaskId(String);

impl SubTaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `task_N`
    pub fn numbered(n: usize) -> Self {
        Self(format!("task_{}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubTaskStatus::Succeeded | SubTaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    id: SubTaskId,
    description: String,
    code_hint: Option<String>,
    status: SubTaskStatus,
    result: Option<String>,
    error: Option<FailureDetail>,
    attempts: Vec<ExecutionAttempt>,
}

impl SubTask {
    pub fn new(id: SubTaskId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            code_hint: None,
            status: SubTaskStatus::Pending,
            result: None,
            error: None,
            attempts: Vec::new(),
        }
    }

    pub fn with_code_hint(mut self, hint: Option<String>) -> Self {
        self.code_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn id(&self) -> &SubTaskId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn code_hint(&self) -> Option<&str> {
        self.code_hint.as_deref()
    }

    pub fn status(&self) -> SubTaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&FailureDetail> {
        self.error.as_ref()
    }

    pub fn attempts(&self) -> &[ExecutionAttempt] {
        &self.attempts
    }

    /// The authoritative attempt
    pub fn last_successful_attempt(&self) -> Option<&ExecutionAttempt> {
        self.attempts.iter().rev().find(|a| a.succeeded())
    }

    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == FailureKind::Cancelled)
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::Internal(format!(
                "cannot {} subtask {}: already {:?}",
                action, self.id, self.status
            )));
        }
        Ok(())
    }

    /// Pending → Running
    pub fn start(&mut self) -> Result<()> {
        self.ensure_open("start")?;
        self.status = SubTaskStatus::Running;
        Ok(())
    }

    pub fn record_attempt(&mut self, attempt: ExecutionAttempt) -> Result<()> {
        self.ensure_open("record an attempt on")?;
        self.attempts.push(attempt);
        Ok(())
    }

    pub fn succeed(&mut self, payload: impl Into<String>) -> Result<()> {
        self.ensure_open("complete")?;
        self.status = SubTaskStatus::Succeeded;
        self.result = Some(payload.into());
        self.error = None;
        Ok(())
    }

    pub fn fail(&mut self, detail: FailureDetail) -> Result<()> {
        self.ensure_open("fail")?;
        self.status = SubTaskStatus::Failed;
        self.error = Some(detail);
        Ok(())
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub request_id: RequestId,
    pub subtasks: Vec<SubTask>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(request_id: RequestId, subtasks: Vec<SubTask>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            subtasks,
            created_at: Utc::now(),
        }
    }

    /// One SubTask covering the whole request
    pub fn single(request: &Request) -> Self {
        Self::new(
            request.id(),
            vec![SubTask::new(SubTaskId::numbered(1), request.text())],
        )
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn status(&self) -> PlanStatus {
        derive_status(&self.subtasks)
    }
}

fn derive_status(subtasks: &[SubTask]) -> PlanStatus {
    if subtasks.iter().any(|t| t.status() == SubTaskStatus::Failed) {
        PlanStatus::Failed
    } else if !subtasks.is_empty()
        && subtasks.iter().all(|t| t.status() == SubTaskStatus::Succeeded)
    {
        PlanStatus::Succeeded
    } else if subtasks.iter().any(|t| t.status() != SubTaskStatus::Pending) {
        PlanStatus::Running
    } else {
        PlanStatus::Pending
    }
}

/// Planner output
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Plan(Plan),
    /// Nothing to execute; answer conversationally
    Direct,
}

// ============================================================================
// PlanResult
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanResultStatus {
    Succeeded,
    PartialFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_id: Uuid,
    pub request_id: RequestId,
    pub status: PlanResultStatus,
    /// One entry per SubTask, in plan order
    pub outcomes: Vec<SubTask>,
    pub duration: Duration,
    /// Oracle-written answer built from `outcomes`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

impl PlanResult {
    pub fn new(plan_id: Uuid, request_id: RequestId, outcomes: Vec<SubTask>, duration: Duration) -> Self {
        let status = if outcomes.iter().all(|t| t.status() == SubTaskStatus::Succeeded) {
            PlanResultStatus::Succeeded
        } else {
            PlanResultStatus::PartialFailure
        };
        Self {
            plan_id,
            request_id,
            status,
            outcomes,
            duration,
            reply: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PlanResultStatus::Succeeded
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|t| t.status() == SubTaskStatus::Succeeded)
            .count()
    }

    /// Successes with their code and output, then failures with their reason
    pub fn synthesis_context(&self) -> String {
        let mut out = format!(
            "Executed {}/{} subtasks successfully.\n",
            self.succeeded_count(),
            self.outcomes.len()
        );

        for task in self.outcomes.iter().filter(|t| t.status() == SubTaskStatus::Succeeded) {
            out.push_str(&format!("\n### {}: {}\n", task.id(), task.description()));
            if let Some(attempt) = task.last_successful_attempt() {
                out.push_str(&format!("Code:\n```python\n{}\n```\n", attempt.code()));
            }
            out.push_str(&format!("Result:\n{}\n", task.result().unwrap_or("").trim_end()));
        }

        let failed: Vec<&SubTask> = self
            .outcomes
            .iter()
            .filter(|t| t.status() != SubTaskStatus::Succeeded)
            .collect();
        if !failed.is_empty() {
            out.push_str(&format!("\nFailed subtasks: {}\n", failed.len()));
            for task in failed {
                let reason = task
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "not finished".to_string());
                out.push_str(&format!("- {} ({}): {}\n", task.id(), task.description(), reason));
            }
        }
        out
    }

    /// Human-readable report
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let total = self.outcomes.len();
        let ok = self.succeeded_count();

        if total > 1 {
            out.push_str(&format!(
                "{} {}/{} subtasks succeeded ({:.1}s)\n",
                if self.is_success() { "✅" } else { "⚠️" },
                ok,
                total,
                self.duration.as_secs_f64()
            ));
        }

        for task in &self.outcomes {
            let attempts = task.attempts().len();
            match task.status() {
                SubTaskStatus::Succeeded => {
                    if total > 1 {
                        out.push_str(&format!("\n## {}: {}\n", task.id(), task.description()));
                    }
                    out.push_str(task.result().unwrap_or("").trim_end());
                    out.push('\n');
                    if attempts > 1 {
                        out.push_str(&format!("(succeeded after {} attempts)\n", attempts));
                    }
                }
                _ => {
                    out.push_str(&format!("\n## {}: {}\n", task.id(), task.description()));
                    let reason = task
                        .error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "not finished".to_string());
                    out.push_str(&format!("❌ failed after {} attempt(s): {}\n", attempts, reason));
                }
            }
        }

        out.trim().to_string()
    }
}
