//! Parallel Coordinator - Plan 의 SubTask 들을 동시에 실행하고 결과를 모음
//!
//! - 모든 SubTask 를 먼저 spawn 한 뒤 기다린다 (fan-out / fan-in)
//! - `max_concurrency` 가 있으면 각 task 안에서 semaphore 를 잡는다
//! - panic 난 task 는 해당 SubTask 만 Failed(Internal)
//! - 취소 후 `cancellation_grace` 가 지나면 남은 task 를 abort
//! - panic / abort 된 SubTask 는 [`Journal`] 의 마지막 사본으로 복구되어 attempt 를 유지
//! - 상태 변화는 [`SubTaskEvent`] 로 구독자에게 broadcast

use crate::attempt::FailureDetail;
use crate::executor::TaskExecutor;
use crate::plan::{Plan, PlanResult, SubTask};
use crate::progress::{Journal, SubTaskEvent, EVENT_BUFFER};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ParallelCoordinator {
    executor: Arc<TaskExecutor>,
    max_concurrency: Option<usize>,
    grace: Duration,
    events: broadcast::Sender<SubTaskEvent>,
}

impl ParallelCoordinator {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        let max_concurrency = executor.config().max_concurrency;
        let grace = executor.config().cancellation_grace();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            executor,
            max_concurrency,
            grace,
            events,
        }
    }

    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max.filter(|n| *n > 0);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Status changes of every SubTask run from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SubTaskEvent> {
        self.events.subscribe()
    }

    /// Run in the background; the handle can cancel and await it
    pub fn launch(&self, plan: Plan) -> PlanHandle {
        let cancel = CancellationToken::new();
        let fallback = plan.clone();
        let coordinator = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { coordinator.run(plan, token).await });
        PlanHandle {
            cancel,
            handle,
            fallback,
        }
    }

    /// Run every SubTask and return one outcome per SubTask, in plan order
    pub async fn run(&self, plan: Plan, cancel: CancellationToken) -> PlanResult {
        let started = std::time::Instant::now();
        let Plan {
            id,
            request_id,
            subtasks,
            ..
        } = plan;
        info!("[{}] Running plan {} with {} subtask(s)", request_id, id, subtasks.len());

        let journals: Vec<Journal> = subtasks
            .iter()
            .map(|t| Journal::new(t).with_events(self.events.clone()))
            .collect();
        let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        let handles: Vec<JoinHandle<SubTask>> = subtasks
            .into_iter()
            .zip(&journals)
            .map(|(subtask, journal)| {
                let executor = Arc::clone(&self.executor);
                let semaphore = semaphore.clone();
                let cancel = cancel.clone();
                let journal = journal.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => tokio::select! {
                            permit = semaphore.acquire_owned() => permit.ok(),
                            _ = cancel.cancelled() => {
                                let subtask = failed(&subtask, FailureDetail::cancelled());
                                journal.publish(&subtask);
                                return subtask;
                            }
                        },
                        None => None,
                    };
                    executor.run_with_journal(subtask, cancel, &journal).await
                })
            })
            .collect();

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(i, handle)| async move { (i, handle.await) })
            .collect();

        let mut outcomes: Vec<Option<SubTask>> = vec![None; journals.len()];
        let mut deadline: Option<Instant> = None;
        let mut aborted = false;

        loop {
            let current = deadline;
            let grace_expired = async move {
                match current {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                joined = pending.next() => match joined {
                    Some((i, joined)) => outcomes[i] = Some(settle(&journals[i], joined)),
                    None => break,
                },
                _ = cancel.cancelled(), if deadline.is_none() => {
                    info!("[{}] Plan cancelled, waiting up to {:?}", request_id, self.grace);
                    deadline = Some(Instant::now() + self.grace);
                }
                _ = grace_expired, if deadline.is_some() && !aborted => {
                    aborted = true;
                    let stragglers: Vec<usize> =
                        (0..outcomes.len()).filter(|i| outcomes[*i].is_none()).collect();
                    warn!("[{}] Aborting {} subtask(s) after grace period", request_id, stragglers.len());
                    for i in stragglers {
                        aborts[i].abort();
                    }
                }
            }
        }

        let outcomes: Vec<SubTask> = outcomes
            .into_iter()
            .zip(&journals)
            .map(|(outcome, journal)| {
                outcome.unwrap_or_else(|| {
                    failed(&journal.snapshot(), FailureDetail::internal("subtask produced no outcome"))
                })
            })
            .collect();

        let result = PlanResult::new(id, request_id, outcomes, started.elapsed());
        info!(
            "[{}] Plan finished: {}/{} succeeded in {:?}",
            request_id,
            result.succeeded_count(),
            result.outcomes.len(),
            result.duration
        );
        result
    }
}

/// `snapshot` failed with `detail`, unless it already finished
fn failed(snapshot: &SubTask, detail: FailureDetail) -> SubTask {
    let mut subtask = snapshot.clone();
    if !subtask.status().is_terminal() {
        if let Err(e) = subtask.fail(detail) {
            warn!("{}", e);
        }
    }
    subtask
}

/// Outcome of a joined task
///
/// Panics and aborts fall back to the last published state, so attempts
/// recorded before the task died are kept.
fn settle(journal: &Journal, joined: Result<SubTask, JoinError>) -> SubTask {
    let (subtask, detail) = match joined {
        Ok(subtask) => return subtask,
        Err(e) if e.is_panic() => {
            let snapshot = journal.snapshot();
            warn!("Subtask {} panicked", snapshot.id());
            (snapshot, FailureDetail::internal(format!("executor panicked: {}", e)))
        }
        Err(_) => {
            let snapshot = journal.snapshot();
            debug!("Subtask {} aborted", snapshot.id());
            (snapshot, FailureDetail::cancelled())
        }
    };
    let settled = failed(&subtask, detail);
    journal.publish(&settled);
    settled
}

// ============================================================================
// PlanHandle
// ============================================================================

pub struct PlanHandle {
    cancel: CancellationToken,
    handle: JoinHandle<PlanResult>,
    fallback: Plan,
}

impl PlanHandle {
    /// Fire the token shared by every Executor of the plan
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> PlanResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Coordinator task failed: {}", e);
                let detail = FailureDetail::internal(format!("coordinator failed: {}", e));
                let outcomes = self
                    .fallback
                    .subtasks
                    .iter()
                    .map(|s| failed(s, detail.clone()))
                    .collect();
                PlanResult::new(self.fallback.id, self.fallback.request_id, outcomes, Duration::ZERO)
            }
        }
    }
}
