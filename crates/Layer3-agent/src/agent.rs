//! Agent - Router / Planner / Coordinator / Verification 을 하나로 묶는 진입점

use crate::coordinator::ParallelCoordinator;
use crate::executor::TaskExecutor;
use crate::plan::{Plan, PlanOutcome, PlanResult};
use crate::planner::Planner;
use crate::progress::SubTaskEvent;
use crate::router::{Router, RoutingDecision};
use crate::verification::{VerificationPipeline, VerificationQueue};
use serde::Serialize;
use skillforge_foundation::{AgentConfig, Request, Result};
use skillforge_oracle::{CapabilityOracle, OracleClient};
use skillforge_sandbox::{ResourceLimits, SandboxRuntime};
use skillforge_skill::SkillIndex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What the caller gets back for one request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutcome {
    /// Conversational reply, nothing was executed
    Direct { reply: String },
    Plan(PlanResult),
}

impl AgentOutcome {
    /// Direct replies and fully successful plans
    pub fn is_success(&self) -> bool {
        match self {
            AgentOutcome::Direct { .. } => true,
            AgentOutcome::Plan(result) => result.is_success(),
        }
    }
}

pub struct Agent {
    router: Router,
    planner: Planner,
    coordinator: ParallelCoordinator,
    oracle: OracleClient,
    verification: Option<VerificationQueue>,
    synthesize: bool,
}

impl Agent {
    /// Build every component from `config`
    ///
    /// Starts the verification worker when verification is enabled, so this
    /// must run inside a tokio runtime.
    pub fn new(
        config: &AgentConfig,
        oracle: Arc<dyn CapabilityOracle>,
        sandbox: Arc<dyn SandboxRuntime>,
        index: Arc<dyn SkillIndex>,
    ) -> Self {
        let client = OracleClient::from_config(oracle, &config.oracle);
        let limits = ResourceLimits::from_settings(&config.sandbox);
        let workspace = config.sandbox.workspace.clone();

        let verification = config.verification.enabled.then(|| {
            let pipeline = VerificationPipeline::new(
                client.clone(),
                Arc::clone(&sandbox),
                Arc::clone(&index),
                config.verification.clone(),
            )
            .with_limits(limits)
            .with_workspace(workspace.clone());
            VerificationQueue::start(pipeline, config.verification.queue_capacity)
        });

        let mut executor = TaskExecutor::new(client.clone(), sandbox, index, config.executor.clone())
            .with_similarity(config.skills.similarity)
            .with_limits(limits)
            .with_workspace(workspace);
        if let Some(queue) = &verification {
            executor = executor.with_verification(queue.clone());
        }

        Self {
            router: Router::new(config.router.clone()).with_oracle(client.clone()),
            planner: Planner::new(config.planner.clone(), client.clone()),
            coordinator: ParallelCoordinator::new(Arc::new(executor)),
            oracle: client,
            verification,
            synthesize: config.planner.synthesize,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn coordinator(&self) -> &ParallelCoordinator {
        &self.coordinator
    }

    pub fn verification(&self) -> Option<&VerificationQueue> {
        self.verification.as_ref()
    }

    /// SubTask status changes of every plan run from now on
    pub fn subscribe_progress(&self) -> broadcast::Receiver<SubTaskEvent> {
        self.coordinator.subscribe()
    }

    /// Route, plan and execute one request
    ///
    /// Task failures are reported inside the PlanResult. `Err` only comes
    /// from a conversational reply that could not be produced. A plan of
    /// several SubTasks also gets an oracle-written reply when synthesis is on;
    /// if that call fails the result is returned without one.
    pub async fn handle(&self, request: Request, cancel: CancellationToken) -> Result<AgentOutcome> {
        let decision = self.router.resolve(&request).await;
        info!("[{}] Routing decision: {}", request.id(), decision.name());

        let plan = match decision {
            RoutingDecision::Direct(_) => return self.converse(&request).await,
            RoutingDecision::SequentialTask(_) => Plan::single(&request),
            RoutingDecision::ParallelPlan(_) => match self.planner.plan(&request).await {
                PlanOutcome::Plan(plan) => plan,
                PlanOutcome::Direct => return self.converse(&request).await,
            },
        };

        let mut result = self.coordinator.run(plan, cancel.clone()).await;
        if self.synthesize && result.outcomes.len() > 1 && !cancel.is_cancelled() {
            match self.oracle.synthesize(request.text(), &result.synthesis_context()).await {
                Ok(reply) => result.reply = Some(reply),
                Err(e) => warn!("[{}] Could not synthesize a reply: {}", request.id(), e),
            }
        }
        Ok(AgentOutcome::Plan(result))
    }

    async fn converse(&self, request: &Request) -> Result<AgentOutcome> {
        let reply = self.oracle.converse(request.text()).await?;
        Ok(AgentOutcome::Direct { reply })
    }

    /// Verify every queued candidate, then stop the worker
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.verification {
            queue.shutdown().await;
        }
    }
}
