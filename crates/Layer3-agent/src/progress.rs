//! SubTask Progress - 실행 중인 SubTask 상태를 밖으로 공개
//!
//! Executor 는 SubTask 가 바뀔 때마다 [`Journal`] 에 사본을 남기고
//! [`SubTaskEvent`] 를 broadcast 한다. Coordinator 는 task 가 panic 나거나
//! abort 되면 마지막 사본으로 결과를 만든다. 기록된 attempt 는 그래서 잃지 않는다.

use crate::plan::{SubTask, SubTaskId, SubTaskStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events kept for slow subscribers
pub const EVENT_BUFFER: usize = 256;

// ============================================================================
// SubTaskEvent
// ============================================================================

/// One observed change of a SubTask
#[derive(Debug, Clone, Serialize)]
pub struct SubTaskEvent {
    pub subtask_id: SubTaskId,
    pub description: String,
    pub status: SubTaskStatus,
    /// Attempts recorded so far
    pub attempts: usize,
    /// Failure of the SubTask, or of its latest attempt while it is still running
    pub detail: Option<String>,
}

impl SubTaskEvent {
    pub fn of(subtask: &SubTask) -> Self {
        let detail = subtask.error().map(|e| e.to_string()).or_else(|| {
            subtask
                .attempts()
                .last()
                .and_then(|a| a.failure())
                .map(|f| f.to_string())
        });
        Self {
            subtask_id: subtask.id().clone(),
            description: subtask.description().to_string(),
            status: subtask.status(),
            attempts: subtask.attempts().len(),
            detail,
        }
    }
}

// ============================================================================
// Journal
// ============================================================================

/// Latest published state of one SubTask
#[derive(Clone)]
pub struct Journal {
    latest: Arc<Mutex<SubTask>>,
    events: Option<broadcast::Sender<SubTaskEvent>>,
}

impl Journal {
    pub fn new(subtask: &SubTask) -> Self {
        Self {
            latest: Arc::new(Mutex::new(subtask.clone())),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<SubTaskEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn publish(&self, subtask: &SubTask) {
        *self.latest.lock() = subtask.clone();
        if let Some(events) = &self.events {
            // nobody listening is fine
            let _ = events.send(SubTaskEvent::of(subtask));
        }
    }

    pub fn snapshot(&self) -> SubTask {
        self.latest.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{ExecutionAttempt, FailureDetail, FailureKind};

    #[test]
    fn test_snapshot_follows_publish() {
        let mut subtask = SubTask::new(SubTaskId::numbered(1), "count words");
        let journal = Journal::new(&subtask);
        assert!(journal.snapshot().attempts().is_empty());

        subtask.start().unwrap();
        subtask
            .record_attempt(ExecutionAttempt::failed(
                1,
                "print(x)",
                FailureDetail::new(FailureKind::SandboxRuntimeFailure, "NameError: x"),
            ))
            .unwrap();
        journal.publish(&subtask);

        let snapshot = journal.snapshot();
        assert_eq!(snapshot.status(), SubTaskStatus::Running);
        assert_eq!(snapshot.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_events_carry_latest_failure() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut subtask = SubTask::new(SubTaskId::numbered(2), "sort numbers");
        let journal = Journal::new(&subtask).with_events(tx);

        subtask.start().unwrap();
        journal.publish(&subtask);
        subtask
            .record_attempt(ExecutionAttempt::failed(
                1,
                "sorted(",
                FailureDetail::new(FailureKind::SandboxRuntimeFailure, "SyntaxError"),
            ))
            .unwrap();
        journal.publish(&subtask);

        let started = rx.recv().await.unwrap();
        assert_eq!(started.status, SubTaskStatus::Running);
        assert_eq!(started.detail, None);
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.attempts, 1);
        assert!(failed.detail.unwrap().contains("SyntaxError"));
    }
}
