//! Verification Queue - 백그라운드 워커 하나가 후보를 순서대로 검증
//!
//! `submit` 은 절대 기다리지 않는다. 큐가 가득 찼거나 닫혔으면 후보를 버린다.
//! `shutdown` 이 끝나면 report 스트림도 닫히므로 구독자의 `recv` 루프가 종료된다.

use super::pipeline::{VerificationPipeline, VerificationReport};
use super::VerificationCandidate;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reports kept for slow subscribers
const REPORT_BUFFER: usize = 64;

enum Message {
    Candidate(Box<VerificationCandidate>),
    Shutdown,
}

#[derive(Clone)]
pub struct VerificationQueue {
    tx: mpsc::Sender<Message>,
    /// Taken on shutdown so that every receiver sees `Closed`
    reports: Arc<SyncMutex<Option<broadcast::Sender<VerificationReport>>>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    closed: Arc<AtomicBool>,
}

impl VerificationQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(pipeline: VerificationPipeline, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        let worker = tokio::spawn(run_worker(pipeline, rx, reports.clone()));

        Self {
            tx,
            reports: Arc::new(SyncMutex::new(Some(reports))),
            worker: Arc::new(Mutex::new(Some(worker))),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue without waiting. `false` if the candidate was dropped.
    pub fn submit(&self, candidate: VerificationCandidate) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            warn!("Verification queue is shut down, dropping '{}'", candidate.description);
            return false;
        }

        let description = candidate.description.clone();
        match self.tx.try_send(Message::Candidate(Box::new(candidate))) {
            Ok(()) => {
                debug!("Queued '{}' for verification", description);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Verification queue is full, dropping '{}'", description);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Verification worker is gone, dropping '{}'", description);
                false
            }
        }
    }

    /// Reports of every candidate verified from now on
    ///
    /// The stream ends once [`shutdown`](Self::shutdown) has drained the queue.
    pub fn subscribe(&self) -> broadcast::Receiver<VerificationReport> {
        match self.reports.lock().as_ref() {
            Some(reports) => reports.subscribe(),
            None => {
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting candidates, verify everything already queued, then stop the worker
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // the marker lands behind every queued candidate
        let _ = self.tx.send(Message::Shutdown).await;

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Verification worker ended abnormally: {}", e);
            }
        }
        // the worker's clone is gone, this drops the last sender
        self.reports.lock().take();
    }
}

async fn run_worker(
    pipeline: VerificationPipeline,
    mut rx: mpsc::Receiver<Message>,
    reports: broadcast::Sender<VerificationReport>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Candidate(candidate) => verify(&pipeline, *candidate, &reports).await,
            Message::Shutdown => break,
        }
    }

    // a submit that raced shutdown can land behind the marker
    rx.close();
    while let Some(message) = rx.recv().await {
        if let Message::Candidate(candidate) = message {
            warn!(
                "'{}' was queued after shutdown began, verifying it before stopping",
                candidate.description
            );
            verify(&pipeline, *candidate, &reports).await;
        }
    }
    info!("Verification worker stopped");
}

async fn verify(
    pipeline: &VerificationPipeline,
    candidate: VerificationCandidate,
    reports: &broadcast::Sender<VerificationReport>,
) {
    let report = pipeline.verify(candidate).await;
    // no subscribers is fine
    let _ = reports.send(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SubTaskId;
    use skillforge_foundation::VerificationConfig;
    use skillforge_oracle::{CallSite, OracleClient, RetryConfig, ScriptedOracle};
    use skillforge_sandbox::ScriptedSandbox;
    use skillforge_skill::{InMemorySkillIndex, SkillIndex};

    fn candidate(n: usize) -> VerificationCandidate {
        VerificationCandidate {
            subtask_id: SubTaskId::numbered(n),
            description: format!("Print number {}", n),
            code: format!("print({})", n),
            dependencies: Vec::new(),
            original_output: n.to_string(),
            original_stdout: format!("{}\n", n),
        }
    }

    fn pipeline(index: Arc<InMemorySkillIndex>) -> VerificationPipeline {
        let oracle = ScriptedOracle::new().with_responder(CallSite::Documentation, |req| {
            let n = req.prompt.split("print(").nth(1).and_then(|s| s.split(')').next()).unwrap_or("0");
            format!("---\nname: print-number-{n}\ndescription: Print {n}\n---\n# Print\n")
        });
        VerificationPipeline::new(
            OracleClient::new(Arc::new(oracle)).with_retry(RetryConfig::no_retry()),
            Arc::new(ScriptedSandbox::new()),
            index,
            VerificationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let index = Arc::new(InMemorySkillIndex::default());
        let queue = VerificationQueue::start(pipeline(index.clone()), 8);
        let mut reports = queue.subscribe();

        assert!(queue.submit(candidate(1)));
        assert!(queue.submit(candidate(2)));
        queue.shutdown().await;

        assert_eq!(index.len().await.unwrap(), 2);
        assert!(reports.recv().await.unwrap().is_saved());
        assert!(reports.recv().await.unwrap().is_saved());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_dropped() {
        let index = Arc::new(InMemorySkillIndex::default());
        let queue = VerificationQueue::start(pipeline(index.clone()), 8);
        queue.shutdown().await;
        assert!(!queue.submit(candidate(1)));
        // a second shutdown is a no-op
        queue.shutdown().await;
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_report_stream_closes_on_shutdown() {
        let index = Arc::new(InMemorySkillIndex::default());
        let queue = VerificationQueue::start(pipeline(index), 8);
        let mut rx = queue.subscribe();
        let listener = tokio::spawn(async move {
            let mut seen = 0;
            while rx.recv().await.is_ok() {
                seen += 1;
            }
            seen
        });

        assert!(queue.submit(candidate(1)));
        queue.shutdown().await;

        let seen = tokio::time::timeout(std::time::Duration::from_secs(3), listener)
            .await
            .expect("listener still running after shutdown")
            .unwrap();
        assert_eq!(seen, 1);
        assert!(matches!(
            queue.subscribe().recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_candidate_behind_shutdown_marker_is_verified() {
        let index = Arc::new(InMemorySkillIndex::default());
        let queue = VerificationQueue::start(pipeline(index.clone()), 8);
        // the worker cannot run before the first await, so both land in order
        queue.tx.try_send(Message::Shutdown).unwrap();
        queue
            .tx
            .try_send(Message::Candidate(Box::new(candidate(3))))
            .unwrap();
        queue.shutdown().await;

        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_without_blocking() {
        let index = Arc::new(InMemorySkillIndex::default());
        let queue = VerificationQueue::start(pipeline(index), 1);
        // the worker cannot run until this task yields
        assert!(queue.submit(candidate(1)));
        assert!(!queue.submit(candidate(2)));
        queue.shutdown().await;
    }
}
