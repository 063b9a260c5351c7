//! Configuration types
//!
//! 모든 섹션은 `#[serde(default)]` 이므로 settings.json 에는
//! 바꾸고 싶은 값만 적으면 된다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// AgentConfig - 최상위 설정
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub router: RouterConfig,
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub sandbox: SandboxSettings,
    pub verification: VerificationConfig,
    pub skills: SkillIndexConfig,
    pub oracle: OracleConfig,
}

impl AgentConfig {
    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        if self.router.parallel_signal_threshold == 0 {
            return Err(Error::Config(
                "router.parallel_signal_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.planner.dedupe_threshold)
            || self.planner.dedupe_threshold == 0.0
        {
            return Err(Error::Config(
                "planner.dedupe_threshold must be in (0, 1]".into(),
            ));
        }
        if self.planner.max_subtasks == 0 {
            return Err(Error::Config("planner.max_subtasks must be at least 1".into()));
        }
        if self.sandbox.timeout_ms == 0 {
            return Err(Error::Config("sandbox.timeout_ms must be non-zero".into()));
        }
        if self.oracle.timeout_ms == 0 {
            return Err(Error::Config("oracle.timeout_ms must be non-zero".into()));
        }
        if let Some(0) = self.executor.max_concurrency {
            return Err(Error::Config(
                "executor.max_concurrency must be at least 1 when set".into(),
            ));
        }
        self.skills.similarity.validate()
    }
}

// ============================================================================
// Router / Planner
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// conjunctions + separators 합이 이 값 이상이면 ParallelPlan
    pub parallel_signal_threshold: usize,
    /// 애매한 요청을 oracle 에 물어볼지 여부
    pub consult_oracle: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            parallel_signal_threshold: 2,
            consult_oracle: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Token Jaccard similarity at or above which two subtasks are duplicates
    pub dedupe_threshold: f64,
    pub max_subtasks: usize,
    /// 여러 SubTask 결과를 oracle 로 하나의 답변으로 합성
    pub synthesize: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            dedupe_threshold: 0.9,
            max_subtasks: 8,
            synthesize: true,
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 최초 시도 이후 허용되는 repair 횟수 (총 시도 = max_retries + 1)
    pub max_retries: u32,
    /// 검색할 skill 후보 수
    pub top_k: usize,
    /// 동시에 실행할 최대 SubTask 수 (None = 제한 없음)
    pub max_concurrency: Option<usize>,
    /// 취소 후 in-flight SubTask 를 기다리는 시간
    pub cancellation_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            top_k: 3,
            max_concurrency: None,
            cancellation_grace_ms: 5_000,
        }
    }
}

impl ExecutorConfig {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_ms)
    }
}

// ============================================================================
// Sandbox
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// Local interpreter with rlimits
    #[default]
    Process,
    /// Docker container
    Container,
}

impl std::str::FromStr for SandboxKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "process" | "local" => Ok(SandboxKind::Process),
            "container" | "docker" => Ok(SandboxKind::Container),
            other => Err(Error::Config(format!("unknown sandbox kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub kind: SandboxKind,
    /// Wall-clock timeout per invocation
    pub timeout_ms: u64,
    pub memory_mb: u64,
    pub cpu_seconds: u64,
    /// Interpreter used by the process sandbox
    pub python: String,
    /// Image used by the container sandbox
    pub image: String,
    /// Workspace directory shared across invocations, if any
    pub workspace: Option<PathBuf>,
    /// Install missing third-party imports before running
    pub auto_install: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            kind: SandboxKind::Process,
            timeout_ms: 30_000,
            memory_mb: 512,
            cpu_seconds: 60,
            python: "python3".to_string(),
            image: "python:3.12-slim".to_string(),
            workspace: None,
            auto_install: true,
        }
    }
}

impl SandboxSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Verification
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub enabled: bool,
    /// Refine budget shared by every stage of one pipeline run
    pub max_refine_cycles: u32,
    /// Treat differing stdout between the original run and the test run as a failure
    pub require_deterministic_output: bool,
    /// Absolute path prefixes generated code may write to
    pub allowed_write_roots: Vec<String>,
    pub queue_capacity: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_refine_cycles: 3,
            require_deterministic_output: false,
            allowed_write_roots: vec!["/tmp".to_string(), "/workspace".to_string()],
            queue_capacity: 32,
        }
    }
}

// ============================================================================
// Skill Index
// ============================================================================

/// How retrieval scores are filtered
///
/// 인덱스 구현마다 점수 분포가 다르므로 배포 환경에 맞게 조정한다.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SimilarityPolicy {
    /// Keep candidates scoring at least `min_score`
    Absolute { min_score: f32 },
    /// Keep candidates scoring at least `ratio * top_score`, and never below `floor`
    RelativeToTop { ratio: f32, floor: f32 },
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        SimilarityPolicy::Absolute { min_score: 0.35 }
    }
}

impl SimilarityPolicy {
    pub fn validate(&self) -> Result<()> {
        match *self {
            SimilarityPolicy::Absolute { min_score } if !(-1.0..=1.0).contains(&min_score) => {
                Err(Error::Config(format!(
                    "similarity min_score {} outside [-1, 1]",
                    min_score
                )))
            }
            SimilarityPolicy::RelativeToTop { ratio, .. } if ratio <= 0.0 || ratio > 1.0 => Err(
                Error::Config(format!("similarity ratio {} outside (0, 1]", ratio)),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillIndexConfig {
    /// Skill directory (defaults to `~/.skillforge/skills`)
    pub dir: Option<PathBuf>,
    pub similarity: SimilarityPolicy,
}

impl SkillIndexConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(super::CONFIG_DIR_NAME)
                .join("skills")
        })
    }
}

// ============================================================================
// Oracle
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Extra attempts after a malformed response
    pub malformed_retries: u32,
    /// Extra attempts after a transport failure
    pub max_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            api_key: None,
            timeout_ms: 120_000,
            max_tokens: 2048,
            temperature: 0.2,
            malformed_retries: 1,
            max_retries: 3,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
