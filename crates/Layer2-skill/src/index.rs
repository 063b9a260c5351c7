//! SkillIndex trait

use crate::skill::Skill;
use async_trait::async_trait;
use serde::Serialize;
use skillforge_foundation::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    /// An entry with the same name was replaced
    Replaced,
}

#[derive(Debug, Clone)]
pub struct ScoredSkill {
    pub skill: Skill,
    /// Cosine similarity, higher is closer
    pub score: f32,
}

/// Similarity-searchable store of verified skills
///
/// Reads never wait on writers. A name identifies at most one entry, and a
/// replace is observed either fully or not at all.
#[async_trait]
pub trait SkillIndex: Send + Sync {
    async fn upsert(&self, skill: Skill) -> Result<UpsertOutcome>;

    /// Up to `top_k` skills, highest score first
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredSkill>>;

    async fn get(&self, name: &str) -> Result<Option<Skill>>;

    /// `true` if an entry was removed
    async fn remove(&self, name: &str) -> Result<bool>;

    /// All skills, sorted by name
    async fn list(&self) -> Result<Vec<Skill>>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Name of an existing skill with identical code and description
    async fn find_identical(&self, code: &str, description: &str) -> Result<Option<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|s| s.same_content(code, description))
            .map(|s| s.name))
    }
}
