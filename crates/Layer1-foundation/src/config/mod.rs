//! Config - 통합 설정 관리
//!
//! - `types.rs` - AgentConfig 및 섹션별 설정
//! - `loader.rs` - 계층형 settings.json 로더 + 환경 변수 오버라이드

mod loader;
mod types;

pub use loader::{deep_merge, strip_json_comments, ConfigLoader, CONFIG_DIR_NAME};
pub use types::{
    AgentConfig, ExecutorConfig, OracleConfig, PlannerConfig, RouterConfig, SandboxKind,
    SandboxSettings, SimilarityPolicy, SkillIndexConfig, VerificationConfig,
};
