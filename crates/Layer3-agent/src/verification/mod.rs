//! Skill Verification Pipeline
//!
//! 성공한 실행 결과를 Skill 로 저장하기 전에 거치는 단계:
//!
//! ```text
//! Lint ─► Test ─► Document ─► Save ─► Saved
//!   │       │         │         │
//!   └───────┴─► Refine ┘(fail)  └─► Discarded
//! ```
//!
//! 요청 경로를 막지 않도록 [`VerificationQueue`] 의 백그라운드 워커에서 실행된다.

pub mod lint;
pub mod pipeline;
pub mod queue;

pub use lint::{lint_feedback, LintPolicy, LintRule, LintViolation};
pub use pipeline::{next, Next, Stage, StageEvent, VerificationOutcome, VerificationPipeline, VerificationReport};
pub use queue::VerificationQueue;

use crate::plan::SubTaskId;
use serde::{Deserialize, Serialize};

/// A successful attempt offered for promotion to a skill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCandidate {
    pub subtask_id: SubTaskId,
    pub description: String,
    pub code: String,
    /// Installable package names
    pub dependencies: Vec<String>,
    /// Payload the SubTask succeeded with
    pub original_output: String,
    pub original_stdout: String,
}
