//! # skillforge-agent
//!
//! 요청 하나를 받아 실행하고, 성공한 코드를 Skill 로 학습하는 에이전트 계층.
//!
//! ## 흐름
//!
//! ```text
//! Request ─► Router ─┬─ Direct ──────────► oracle conversation
//!                    ├─ SequentialTask ──► Plan(1) ─┐
//!                    └─ ParallelPlan ──► Planner ───┴─► ParallelCoordinator
//!                                                        │  (one Executor per SubTask)
//!                                                        ▼
//!                                   PlanResult    VerificationQueue ─► SkillIndex
//! ```
//!
//! ## 사용 예
//!
//! ```ignore
//! let agent = Agent::new(&config, oracle, sandbox, index);
//! let outcome = agent.handle(Request::new("calculate pi"), CancellationToken::new()).await?;
//! agent.shutdown().await;
//! ```

pub mod agent;
pub mod attempt;
pub mod coordinator;
pub mod executor;
pub mod plan;
pub mod planner;
pub mod progress;
pub mod router;
pub mod verification;

// ============================================================================
// Entry point
// ============================================================================

pub use agent::{Agent, AgentOutcome};

// ============================================================================
// Routing / Planning
// ============================================================================

pub use plan::{
    Plan, PlanOutcome, PlanResult, PlanResultStatus, PlanStatus, SubTask, SubTaskId, SubTaskStatus,
};
pub use planner::Planner;
pub use router::{Router, RoutingDecision, RoutingSignal};

// ============================================================================
// Execution
// ============================================================================

pub use attempt::{AttemptOutcome, ExecutionAttempt, FailureDetail, FailureKind};
pub use coordinator::{ParallelCoordinator, PlanHandle};
pub use executor::{next_state, ExecEvent, ExecState, TaskExecutor};
pub use progress::{Journal, SubTaskEvent};

// ============================================================================
// Verification
// ============================================================================

pub use verification::{
    LintPolicy, LintRule, LintViolation, Stage, VerificationCandidate, VerificationOutcome,
    VerificationPipeline, VerificationQueue, VerificationReport,
};

// Re-export for callers that only depend on this crate
pub use tokio_util::sync::CancellationToken;
