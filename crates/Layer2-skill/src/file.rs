//! File-backed skill index
//!
//! 디렉토리 구조:
//! ```text
//! <root>/
//!   fetch-bitcoin-price/SKILL.md
//!   plot-sine-wave/SKILL.md
//! ```
//!
//! Writes go to a temp file in the skill directory and are renamed over
//! `SKILL.md`, so a reader of the file never sees a partial document. The
//! in-memory snapshot is only swapped after the rename succeeds.

use crate::embedding::{Embedder, HashingEmbedder};
use crate::index::{ScoredSkill, SkillIndex, UpsertOutcome};
use crate::memory::SnapshotStore;
use crate::skill::{validate_skill_name, Skill};
use async_trait::async_trait;
use chrono::Utc;
use skillforge_foundation::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const SKILL_FILE: &str = "SKILL.md";

pub struct FileSkillIndex {
    root: PathBuf,
    store: SnapshotStore,
    /// Serializes writers; readers use the snapshot
    write_gate: Mutex<()>,
}

impl FileSkillIndex {
    /// Open (creating if needed) and load every `<root>/*/SKILL.md`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_embedder(root, Arc::new(HashingEmbedder::default())).await
    }

    pub async fn open_with_embedder(
        root: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let index = Self {
            root: root.into(),
            store: SnapshotStore::new(embedder),
            write_gate: Mutex::new(()),
        };
        index.reload().await?;
        Ok(index)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn skill_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(SKILL_FILE)
    }

    /// Re-read the directory; unreadable entries are skipped with a warning
    pub async fn reload(&self) -> Result<usize> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::Storage(format!("cannot create {}: {}", self.root.display(), e))
        })?;

        let mut skills = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::Storage(format!("cannot read {}: {}", self.root.display(), e)))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(SKILL_FILE);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            match load_skill(&path).await {
                Ok(skill) => {
                    let dir_name = entry.file_name().to_string_lossy().to_string();
                    if skill.name != dir_name {
                        warn!(
                            "Skipping {}: frontmatter name '{}' does not match directory",
                            path.display(),
                            skill.name
                        );
                        continue;
                    }
                    debug!("Loaded skill '{}' from {}", skill.name, path.display());
                    skills.push(skill);
                }
                Err(e) => warn!("Failed to load skill from {}: {}", path.display(), e),
            }
        }

        let count = skills.len();
        self.store.replace_all(skills);
        info!("Loaded {} skills from {}", count, self.root.display());
        Ok(count)
    }
}

async fn load_skill(path: &Path) -> Result<Skill> {
    let content = fs::read_to_string(path).await?;
    let mut skill = Skill::from_markdown(&content)?;
    if let Ok(modified) = fs::metadata(path).await.and_then(|m| m.modified()) {
        skill.updated_at = modified.into();
    }
    Ok(skill)
}

#[async_trait]
impl SkillIndex for FileSkillIndex {
    async fn upsert(&self, mut skill: Skill) -> Result<UpsertOutcome> {
        skill.validate()?;
        skill.updated_at = Utc::now();
        let content = skill.to_markdown()?;
        let skill = self.store.prepare(skill);

        let _gate = self.write_gate.lock().await;

        let dir = self.root.join(&skill.name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", dir.display(), e)))?;

        let tmp = dir.join(format!(".{}.{}.tmp", SKILL_FILE, uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, content).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!("cannot write {}: {}", tmp.display(), e)));
        }

        let target = dir.join(SKILL_FILE);
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::SkillIndexWriteConflict(format!(
                "cannot replace {}: {}",
                target.display(),
                e
            )));
        }

        let name = skill.name.clone();
        let outcome = self.store.insert(skill);
        info!("Saved skill '{}' to {} ({:?})", name, target.display(), outcome);
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
        let _gate = self.write_gate.lock().await;

        let dir = self.root.join(name);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(&dir)
                .await
                .map_err(|e| Error::Storage(format!("cannot remove {}: {}", dir.display(), e)))?;
        }
        let removed = self.store.remove(name);
        if removed {
            info!("Removed skill '{}'", name);
        }
        Ok(removed)
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
    use tempfile::TempDir;

    fn skill(name: &str, code: &str) -> Skill {
        Skill::new(name, format!("Skill {name}"), code)
    }

    #[tokio::test]
    async fn test_upsert_persists_and_reloads() {
        let temp = TempDir::new().unwrap();
        let index = FileSkillIndex::open(temp.path()).await.unwrap();

        index.upsert(skill("make-table", "print('v1')")).await.unwrap();
        let outcome = index.upsert(skill("make-table", "print('v2')")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced);
        assert!(index.skill_path("make-table").exists());

        let reopened = FileSkillIndex::open(temp.path()).await.unwrap();
        let stored = reopened.get("make-table").await.unwrap().unwrap();
        assert_eq!(stored.code, "print('v2')");
        assert_eq!(reopened.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left() {
        let temp = TempDir::new().unwrap();
        let index = FileSkillIndex::open(temp.path()).await.unwrap();
        index.upsert(skill("clean-dir", "x = 1")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path().join("clean-dir"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![SKILL_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        let broken = temp.path().join("broken-skill");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(SKILL_FILE), "no frontmatter").unwrap();

        let mismatched = temp.path().join("dir-name");
        std::fs::create_dir_all(&mismatched).unwrap();
        std::fs::write(
            mismatched.join(SKILL_FILE),
            skill("other-name", "x = 1").to_markdown().unwrap(),
        )
        .unwrap();

        let index = FileSkillIndex::open(temp.path()).await.unwrap();
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_deletes_directory() {
        let temp = TempDir::new().unwrap();
        let index = FileSkillIndex::open(temp.path()).await.unwrap();
        index.upsert(skill("gone-soon", "x = 1")).await.unwrap();

        assert!(index.remove("gone-soon").await.unwrap());
        assert!(!temp.path().join("gone-soon").exists());
        assert!(index.remove("../escape").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_index_untouched() {
        let temp = TempDir::new().unwrap();
        let index = FileSkillIndex::open(temp.path()).await.unwrap();
        index.upsert(skill("kept-skill", "x = 1")).await.unwrap();

        // a regular file where the skill directory should be
        std::fs::write(temp.path().join("blocked-skill"), "").unwrap();
        assert!(index.upsert(skill("blocked-skill", "x = 2")).await.is_err());

        assert_eq!(index.len().await.unwrap(), 1);
        assert!(index.get("blocked-skill").await.unwrap().is_none());
    }
}
