//! In-memory skill index
//!
//! Entries live in a copy-on-write snapshot: readers clone the `Arc` under a
//! brief read lock and score with no lock held; writers build a new map and
//! swap it in.

use crate::embedding::{cosine_similarity, Embedder, HashingEmbedder};
use crate::index::{ScoredSkill, SkillIndex, UpsertOutcome};
use crate::skill::{validate_skill_name, Skill};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use skillforge_foundation::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub(crate) type Snapshot = Arc<HashMap<String, Skill>>;

/// Snapshot + embedder, shared by the in-memory and file-backed indexes
pub(crate) struct SnapshotStore {
    embedder: Arc<dyn Embedder>,
    snapshot: RwLock<Snapshot>,
}

impl SnapshotStore {
    pub(crate) fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    /// Embed and stage a skill for insertion
    pub(crate) fn prepare(&self, mut skill: Skill) -> Skill {
        skill.embedding = self.embedder.embed(&skill.embedding_text());
        skill
    }

    /// Swap in a map containing `skill` (already prepared)
    pub(crate) fn insert(&self, skill: Skill) -> UpsertOutcome {
        let mut guard = self.snapshot.write();
        let mut next = HashMap::clone(&guard);
        let outcome = match next.insert(skill.name.clone(), skill) {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };
        *guard = Arc::new(next);
        outcome
    }

    /// Replace every entry at once (used when loading from disk)
    pub(crate) fn replace_all(&self, skills: Vec<Skill>) {
        let map = skills
            .into_iter()
            .map(|s| {
                let s = self.prepare(s);
                (s.name.clone(), s)
            })
            .collect();
        *self.snapshot.write() = Arc::new(map);
    }

    pub(crate) fn remove(&self, name: &str) -> bool {
        let mut guard = self.snapshot.write();
        if !guard.contains_key(name) {
            return false;
        }
        let mut next = HashMap::clone(&guard);
        next.remove(name);
        *guard = Arc::new(next);
        true
    }

    pub(crate) fn query(&self, text: &str, top_k: usize) -> Vec<ScoredSkill> {
        if top_k == 0 {
            return Vec::new();
        }
        let snapshot = self.snapshot();
        let query = self.embedder.embed(text);

        let mut scored: Vec<ScoredSkill> = snapshot
            .values()
            .map(|skill| ScoredSkill {
                score: cosine_similarity(&query, &skill.embedding),
                skill: skill.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.skill.name.cmp(&b.skill.name))
        });
        scored.truncate(top_k);
        scored
    }

    pub(crate) fn list(&self) -> Vec<Skill> {
        let mut skills: Vec<Skill> = self.snapshot().values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }
}

// ============================================================================
// InMemorySkillIndex
// ============================================================================

pub struct InMemorySkillIndex {
    store: SnapshotStore,
}

impl Default for InMemorySkillIndex {
    fn default() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }
}

impl InMemorySkillIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store: SnapshotStore::new(embedder),
        }
    }
}

#[async_trait]
impl SkillIndex for InMemorySkillIndex {
    async fn upsert(&self, mut skill: Skill) -> Result<UpsertOutcome> {
        skill.validate()?;
        skill.updated_at = Utc::now();
        let skill = self.store.prepare(skill);
        let name = skill.name.clone();
        let outcome = self.store.insert(skill);
        debug!("Upserted skill '{}' ({:?})", name, outcome);
        Ok(outcome)
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredSkill>> {
        Ok(self.store.query(text, top_k))
    }

    async fn get(&self, name: &str) -> Result<Option<Skill>> {
        Ok(self.store.snapshot().get(name).cloned())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        validate_skill_name(name)?;
        Ok(self.store.remove(name))
    }

    async fn list(&self) -> Result<Vec<Skill>> {
        Ok(self.store.list())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.store.snapshot().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, description: &str) -> Skill {
        Skill::new(name, description, format!("print('{name}')"))
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_name() {
        let index = InMemorySkillIndex::default();
        assert_eq!(
            index.upsert(skill("fetch-price", "Fetch a price")).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            index.upsert(skill("fetch-price", "Fetch the price")).await.unwrap(),
            UpsertOutcome::Replaced
        );
        assert_eq!(index.len().await.unwrap(), 1);
        let stored = index.get("fetch-price").await.unwrap().unwrap();
        assert_eq!(stored.description, "Fetch the price");
        assert_eq!(stored.embedding.len(), crate::embedding::DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn test_query_orders_by_score() {
        let index = InMemorySkillIndex::default();
        index.upsert(skill("bitcoin-price", "Fetch the current Bitcoin price in USD")).await.unwrap();
        index.upsert(skill("sine-plot", "Plot a sine wave and save it as PNG")).await.unwrap();
        index.upsert(skill("ethereum-price", "Fetch the current Ethereum price in USD")).await.unwrap();

        let results = index.query("get the Bitcoin price", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].skill.name, "bitcoin-price");
        assert!(results[0].score >= results[1].score);

        assert!(index.query("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_skill_rejected() {
        let index = InMemorySkillIndex::default();
        assert!(index.upsert(skill("Not Kebab", "x")).await.is_err());
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_and_find_identical() {
        let index = InMemorySkillIndex::default();
        index.upsert(skill("sum-list", "Sum a list")).await.unwrap();
        assert_eq!(
            index.find_identical("print('sum-list')", "Sum a list").await.unwrap().as_deref(),
            Some("sum-list")
        );
        assert!(index.find_identical("print(0)", "Sum a list").await.unwrap().is_none());

        assert!(index.remove("sum-list").await.unwrap());
        assert!(!index.remove("sum-list").await.unwrap());
    }

    #[tokio::test]
    async fn test_reader_snapshot_survives_write() {
        let index = InMemorySkillIndex::default();
        index.upsert(skill("one-skill", "first")).await.unwrap();
        let before = index.store.snapshot();
        index.upsert(skill("two-skill", "second")).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(index.len().await.unwrap(), 2);
    }
}
