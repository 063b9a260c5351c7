//! Configuration Loader
//!
//! ## 검색 우선순위
//!
//! 1. User-level: `~/.skillforge/settings.json`
//! 2. Project-level: `.skillforge/settings.json`
//! 3. Local (gitignored): `.skillforge/settings.local.json`
//!
//! 각 레벨의 설정이 이전 레벨을 오버라이드하고, 마지막으로 환경 변수가 적용된다.

use super::types::{AgentConfig, SandboxKind};
use crate::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 설정 폴더 이름
pub const CONFIG_DIR_NAME: &str = ".skillforge";

// ============================================================================
// ConfigLoader - 설정 로더
// ============================================================================

pub struct ConfigLoader {
    search_paths: Vec<ConfigPath>,
}

#[derive(Debug, Clone)]
struct ConfigPath {
    path: PathBuf,
    /// 높을수록 우선
    priority: u8,
    description: &'static str,
}

impl ConfigLoader {
    /// 새 로더 생성 (기본 검색 경로)
    pub fn new(working_dir: &Path) -> Self {
        let mut paths = Vec::new();

        if let Some(home) = dirs::home_dir() {
            paths.push(ConfigPath {
                path: home.join(CONFIG_DIR_NAME).join("settings.json"),
                priority: 10,
                description: "User settings",
            });
        }

        paths.push(ConfigPath {
            path: working_dir.join(CONFIG_DIR_NAME).join("settings.json"),
            priority: 20,
            description: "Project settings",
        });

        paths.push(ConfigPath {
            path: working_dir.join(CONFIG_DIR_NAME).join("settings.local.json"),
            priority: 30,
            description: "Local settings",
        });

        paths.sort_by_key(|p| p.priority);

        Self { search_paths: paths }
    }

    /// 커스텀 검색 경로로 생성 (뒤에 올수록 우선)
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        let search_paths = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| ConfigPath {
                path,
                priority: i as u8,
                description: "Custom",
            })
            .collect();

        Self { search_paths }
    }

    /// 검색 경로 추가
    pub fn add_path(&mut self, path: PathBuf, priority: u8) {
        self.search_paths.push(ConfigPath {
            path,
            priority,
            description: "Added",
        });
        self.search_paths.sort_by_key(|p| p.priority);
    }

    /// 모든 계층을 병합하고 환경 변수를 적용한 설정을 로드
    pub fn load(&self) -> Result<AgentConfig> {
        let mut merged = self.load_files()?;
        apply_env_overrides(&mut merged, |key| std::env::var(key).ok())?;
        merged.validate()?;
        Ok(merged)
    }

    /// 파일 계층만 병합 (환경 변수 미적용)
    pub fn load_files(&self) -> Result<AgentConfig> {
        let mut merged = Value::Object(Default::default());

        for config_path in &self.search_paths {
            if !config_path.path.exists() {
                continue;
            }
            match read_settings_value(&config_path.path) {
                Ok(layer) => {
                    info!(
                        "Loaded {} from {}",
                        config_path.description,
                        config_path.path.display()
                    );
                    deep_merge(&mut merged, layer);
                }
                Err(e) => {
                    warn!(
                        "Failed to load config from {}: {}",
                        config_path.path.display(),
                        e
                    );
                }
            }
        }

        serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("Invalid merged settings: {}", e)))
    }

    /// 존재하는 설정 파일 목록
    pub fn existing_files(&self) -> Vec<PathBuf> {
        self.search_paths
            .iter()
            .filter(|p| p.path.exists())
            .map(|p| p.path.clone())
            .collect()
    }
}

// ============================================================================
// 유틸리티 함수
// ============================================================================

fn read_settings_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    let content = strip_json_comments(&content);

    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Invalid settings.json at {}: {}", path.display(), e))
    })?;

    if !value.is_object() {
        return Err(Error::Config(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }

    debug!("Parsed settings layer {}", path.display());
    Ok(value)
}

/// `later` 를 `earlier` 위에 재귀적으로 덮어쓴다. 객체가 아닌 값은 통째로 교체.
pub fn deep_merge(earlier: &mut Value, later: Value) {
    match (earlier, later) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides<F>(config: &mut AgentConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("SKILLFORGE_ORACLE_URL") {
        config.oracle.base_url = url;
    }
    if let Some(model) = lookup("SKILLFORGE_ORACLE_MODEL") {
        config.oracle.model = model;
    }
    if let Some(key) = lookup("SKILLFORGE_ORACLE_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
        if !key.is_empty() {
            config.oracle.api_key = Some(key);
        }
    }
    if let Some(dir) = lookup("SKILLFORGE_SKILLS_DIR") {
        config.skills.dir = Some(PathBuf::from(dir));
    }
    if let Some(kind) = lookup("SKILLFORGE_SANDBOX") {
        config.sandbox.kind = kind.parse::<SandboxKind>()?;
    }
    Ok(())
}

/// JSON 에서 `//` 및 `/* */` 주석 제거 (문자열 내부는 유지)
pub fn strip_json_comments(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            output.push(c);
            escape_next = false;
            continue;
        }

        if c == '\\' && in_string {
            output.push(c);
            escape_next = true;
            continue;
        }

        if c == '"' {
            in_string = !in_string;
            output.push(c);
            continue;
        }

        if !in_string && c == '/' {
            match chars.peek() {
                Some('/') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '\n' {
                            output.push(c);
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        prev = c;
                    }
                    continue;
                }
                _ => {}
            }
        }

        output.push(c);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let input = r#"{
            // comment
            "url": "http://localhost//v1", /* block */
            "n": 1
        }"#;
        let stripped = strip_json_comments(input);
        let value: Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["url"], "http://localhost//v1");
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_layers_override_in_order() {
        let temp = TempDir::new().unwrap();
        let user = write(
            temp.path(),
            "user.json",
            r#"{"executor": {"max_retries": 4, "top_k": 7}, "oracle": {"model": "a"}}"#,
        );
        let project = write(
            temp.path(),
            "project.json",
            r#"{"executor": {"max_retries": 1}, "oracle": {"model": "b"}}"#,
        );

        let loader = ConfigLoader::with_paths(vec![user, project]);
        let config = loader.load_files().unwrap();

        assert_eq!(config.executor.max_retries, 1);
        assert_eq!(config.executor.top_k, 7);
        assert_eq!(config.oracle.model, "b");
    }

    #[test]
    fn test_invalid_layer_is_skipped() {
        let temp = TempDir::new().unwrap();
        let good = write(temp.path(), "good.json", r#"{"planner": {"max_subtasks": 3}}"#);
        let bad = write(temp.path(), "bad.json", "not json");

        let loader = ConfigLoader::with_paths(vec![good, bad]);
        let config = loader.load_files().unwrap();
        assert_eq!(config.planner.max_subtasks, 3);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SKILLFORGE_ORACLE_MODEL", "gpt-4o-mini"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SKILLFORGE_SANDBOX", "container"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.oracle.model, "gpt-4o-mini");
        assert_eq!(config.oracle.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.sandbox.kind, SandboxKind::Container);
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::new(temp.path());
        assert!(loader
            .existing_files()
            .iter()
            .all(|p| !p.starts_with(temp.path())));
        let config = loader.load_files();
        assert!(config.is_ok());
    }
}
