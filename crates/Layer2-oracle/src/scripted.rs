//! Deterministic oracle
//!
//! Replays queued replies per call site, then falls back to a per-site
//! responder. Used by test suites and by offline runs of the agent.

use crate::error::OracleError;
use crate::oracle::{CallSite, CapabilityOracle, OracleRequest, OracleResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

type Responder = Arc<dyn Fn(&OracleRequest) -> String + Send + Sync>;

#[derive(Default)]
pub struct ScriptedOracle {
    queued: Mutex<HashMap<CallSite, VecDeque<std::result::Result<String, OracleError>>>>,
    responders: HashMap<CallSite, Responder>,
    calls: Mutex<Vec<OracleRequest>>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply for a call site
    pub fn with_reply(self, site: CallSite, reply: impl Into<String>) -> Self {
        self.queued.lock().entry(site).or_default().push_back(Ok(reply.into()));
        self
    }

    /// Queue one transport error for a call site
    pub fn with_error(self, site: CallSite, error: OracleError) -> Self {
        self.queued.lock().entry(site).or_default().push_back(Err(error));
        self
    }

    /// Reply used once the queue for `site` is empty
    pub fn with_default(self, site: CallSite, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        self.with_responder(site, move |_| reply.clone())
    }

    /// Compute the reply from the request once the queue for `site` is empty
    pub fn with_responder<F>(mut self, site: CallSite, responder: F) -> Self
    where
        F: Fn(&OracleRequest) -> String + Send + Sync + 'static,
    {
        self.responders.insert(site, Arc::new(responder));
        self
    }

    /// Latency added to every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<OracleRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, site: CallSite) -> usize {
        self.calls.lock().iter().filter(|r| r.call_site == site).count()
    }
}

#[async_trait]
impl CapabilityOracle for ScriptedOracle {
    async fn propose(&self, request: OracleRequest) -> std::result::Result<OracleResponse, OracleError> {
        self.calls.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(&request.call_site)
            .and_then(|queue| queue.pop_front());

        match queued {
            Some(reply) => reply.map(OracleResponse::text),
            None => match self.responders.get(&request.call_site) {
                Some(responder) => Ok(OracleResponse::text(responder(&request))),
                None => Err(OracleError::NotConfigured(format!(
                    "no scripted reply for {}",
                    request.call_site
                ))),
            },
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_responder() {
        let oracle = ScriptedOracle::new()
            .with_reply(CallSite::Conversation, "first")
            .with_responder(CallSite::Conversation, |req| format!("echo {}", req.prompt));

        let req = OracleRequest::new(CallSite::Conversation, "", "hi");
        assert_eq!(oracle.propose(req.clone()).await.unwrap().content, "first");
        assert_eq!(oracle.propose(req).await.unwrap().content, "echo hi");
        assert_eq!(oracle.calls_for(CallSite::Conversation), 2);
    }

    #[tokio::test]
    async fn test_unscripted_site_errors() {
        let oracle = ScriptedOracle::new();
        let req = OracleRequest::new(CallSite::Routing, "", "hi");
        assert!(matches!(
            oracle.propose(req).await,
            Err(OracleError::NotConfigured(_))
        ));
    }
}
