//! # SkillForge Skill
//!
//! Verified, reusable code units and the index that retrieves them.
//!
//! - [`Skill`] / [`SkillDocument`]: SKILL.md model (YAML frontmatter + sections)
//! - [`SkillIndex`]: upsert / similarity query, in-memory or file-backed
//! - [`HashingEmbedder`]: deterministic feature-hashing embeddings

pub mod document;
pub mod embedding;
pub mod file;
pub mod index;
pub mod memory;
pub mod retrieval;
pub mod skill;

pub use document::{SkillDocument, SkillFrontmatter, SECTIONS};
pub use embedding::{cosine_similarity, Embedder, HashingEmbedder, DEFAULT_DIMENSION};
pub use file::{FileSkillIndex, SKILL_FILE};
pub use index::{ScoredSkill, SkillIndex, UpsertOutcome};
pub use memory::InMemorySkillIndex;
pub use retrieval::apply_similarity_policy;
pub use skill::{is_kebab_case, slugify, validate_skill_name, Skill, SkillMetadata, MAX_NAME_LEN};
