//! Skill - 검증된 코드 단위
//!
//! Skill은 Verification Pipeline을 통과한 코드와 그 문서를 묶은 것이다.
//! 이름(kebab-case)이 인덱스의 유일 키이다.

use crate::document::{SkillDocument, SkillFrontmatter};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use skillforge_foundation::{Error, Result};
use std::sync::OnceLock;

/// 이름 최대 길이
pub const MAX_NAME_LEN: usize = 64;

/// slugify 시 사용하는 최대 단어 수
const SLUG_MAX_WORDS: usize = 4;

/// 이름에 넣지 않는 단어
const SLUG_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "for", "in", "on", "with", "from", "by", "at",
    "into", "using", "that", "this", "it", "its", "as", "is", "be", "then", "all", "some",
];

// ============================================================================
// SkillMetadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub version: String,
    /// Installable package names
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// e.g. network, filesystem-write
    #[serde(default)]
    pub allowed_capabilities: Vec<String>,
}

impl Default for SkillMetadata {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            dependencies: Vec::new(),
            allowed_capabilities: Vec::new(),
        }
    }
}

// ============================================================================
// Skill
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    /// Unique kebab-case key
    pub name: String,
    pub description: String,
    /// Filled by the index's embedder on upsert
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub code: String,
    pub metadata: SkillMetadata,
    /// Markdown body below the frontmatter
    pub documentation: String,
    pub updated_at: DateTime<Utc>,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            embedding: Vec::new(),
            code: code.into(),
            metadata: SkillMetadata::default(),
            documentation: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: SkillMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = documentation.into();
        self
    }

    /// Text fed to the embedder
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.name.replace('-', " "), self.description)
    }

    /// Same behaviour as another skill (code and description match)
    pub fn same_content(&self, code: &str, description: &str) -> bool {
        self.code.trim() == code.trim() && self.description.trim() == description.trim()
    }

    /// Name, description and code must be usable
    pub fn validate(&self) -> Result<()> {
        validate_skill_name(&self.name)?;
        if self.description.trim().is_empty() {
            return Err(Error::Validation(format!(
                "skill '{}' has no description",
                self.name
            )));
        }
        if self.code.trim().is_empty() {
            return Err(Error::Validation(format!("skill '{}' has no code", self.name)));
        }
        Ok(())
    }

    // ========================================================================
    // SKILL.md 변환
    // ========================================================================

    pub fn to_document(&self) -> SkillDocument {
        let mut doc = SkillDocument::new(
            SkillFrontmatter {
                name: self.name.clone(),
                description: self.description.clone(),
                version: self.metadata.version.clone(),
                dependencies: self.metadata.dependencies.clone(),
                allowed_capabilities: self.metadata.allowed_capabilities.clone(),
            },
            self.documentation.clone(),
        );
        doc.set_code(&self.code);
        doc
    }

    pub fn to_markdown(&self) -> Result<String> {
        self.to_document().render()
    }

    /// Build from a parsed document; the code comes from its `## Code` block
    pub fn from_document(doc: SkillDocument) -> Result<Self> {
        let code = doc.code().ok_or_else(|| {
            Error::Validation(format!(
                "skill '{}' has no code block",
                doc.frontmatter.name
            ))
        })?;

        let skill = Self {
            name: doc.frontmatter.name.clone(),
            description: doc.frontmatter.description.clone(),
            embedding: Vec::new(),
            code,
            metadata: SkillMetadata {
                version: doc.frontmatter.version.clone(),
                dependencies: doc.frontmatter.dependencies.clone(),
                allowed_capabilities: doc.frontmatter.allowed_capabilities.clone(),
            },
            documentation: doc.body,
            updated_at: Utc::now(),
        };
        skill.validate()?;
        Ok(skill)
    }

    pub fn from_markdown(content: &str) -> Result<Self> {
        Self::from_document(SkillDocument::parse(content)?)
    }
}

// ============================================================================
// 이름 규칙
// ============================================================================

fn kebab_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("kebab pattern is a valid regex")
    })
}

pub fn is_kebab_case(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && kebab_re().is_match(name)
}

pub fn validate_skill_name(name: &str) -> Result<()> {
    if is_kebab_case(name) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "skill name '{}' must be kebab-case and at most {} characters",
            name, MAX_NAME_LEN
        )))
    }
}

/// Derive a kebab-case name from free text
///
/// "Fetch the current Bitcoin price" → `fetch-current-bitcoin-price`
pub fn slugify(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect();

    let meaningful: Vec<&String> = words
        .iter()
        .filter(|w| !SLUG_STOPWORDS.contains(&w.as_str()))
        .collect();
    let chosen: Vec<&String> = if meaningful.is_empty() {
        words.iter().collect()
    } else {
        meaningful
    };

    let mut slug = String::new();
    for word in chosen.into_iter().take(SLUG_MAX_WORDS) {
        let extra = if slug.is_empty() { word.len() } else { word.len() + 1 };
        if slug.len() + extra > MAX_NAME_LEN {
            break;
        }
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(word);
    }

    if slug.is_empty() {
        "unnamed-skill".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kebab_case() {
        assert!(is_kebab_case("fetch-bitcoin-price"));
        assert!(is_kebab_case("plot2d"));
        assert!(!is_kebab_case("Fetch-Price"));
        assert!(!is_kebab_case("fetch--price"));
        assert!(!is_kebab_case("-fetch"));
        assert!(!is_kebab_case("../etc"));
        assert!(!is_kebab_case(&"a".repeat(65)));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fetch the current Bitcoin price"), "fetch-current-bitcoin-price");
        assert_eq!(slugify("Calculate   π to 50 digits!"), "calculate-50-digits");
        assert_eq!(slugify("the and of"), "the-and-of");
        assert_eq!(slugify("!!!"), "unnamed-skill");
        assert!(is_kebab_case(&slugify(&"word ".repeat(40))));
    }

    #[test]
    fn test_markdown_round_trip_keeps_code() {
        let skill = Skill::new("add-numbers", "Add two numbers", "print(1 + 2)")
            .with_documentation("# Add Numbers\n\n## Description\nAdds.\n");
        let parsed = Skill::from_markdown(&skill.to_markdown().unwrap()).unwrap();
        assert_eq!(parsed.name, "add-numbers");
        assert_eq!(parsed.code, "print(1 + 2)");
        assert_eq!(parsed.metadata.version, "1.0.0");
    }

    #[test]
    fn test_validate() {
        assert!(Skill::new("ok-name", "d", "x = 1").validate().is_ok());
        assert!(Skill::new("Bad Name", "d", "x = 1").validate().is_err());
        assert!(Skill::new("ok-name", " ", "x = 1").validate().is_err());
        assert!(Skill::new("ok-name", "d", "").validate().is_err());
    }
}
