//! # skillforge-foundation
//!
//! Foundation layer for SkillForge:
//! - Error: 전체 워크스페이스 공용 에러 분류 (`Error`, `Result`)
//! - Config: 계층형 settings.json 로더와 섹션별 설정 (`AgentConfig`)
//! - Request: 불변 사용자 요청 + correlation id
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Layer4  skillforge-cli                                  │
//! │  Layer3  skillforge-agent  (router, planner, executor,   │
//! │                             coordinator, verification)   │
//! │  Layer2  skillforge-sandbox │ skillforge-oracle │ skill  │
//! │  Layer1  skillforge-foundation                           │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod request;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    AgentConfig, ConfigLoader, ExecutorConfig, OracleConfig, PlannerConfig, RouterConfig,
    SandboxKind, SandboxSettings, SimilarityPolicy, SkillIndexConfig, VerificationConfig,
};

// ============================================================================
// Request
// ============================================================================
pub use request::{Request, RequestId};
