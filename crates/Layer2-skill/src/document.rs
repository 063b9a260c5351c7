//! SKILL.md 문서 형식
//!
//! ```text
//! ---
//! name: fetch-bitcoin-price
//! description: Fetch the current Bitcoin price in USD
//! version: 1.0.0
//! dependencies: [requests]
//! allowed-capabilities: [network]
//! ---
//!
//! # Fetch Bitcoin Price
//!
//! ## Description
//! ## When to Use
//! ## How to Use
//! ## Dependencies
//! ## Code
//! ## Troubleshooting
//! ```
//!
//! Only the fenced python block under `## Code` is executable.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use skillforge_foundation::{Error, Result};

/// Canonical section order
pub const SECTIONS: &[&str] = &[
    "Description",
    "When to Use",
    "How to Use",
    "Dependencies",
    "Code",
    "Troubleshooting",
];

// ============================================================================
// Frontmatter
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillFrontmatter {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_version", deserialize_with = "lenient_version")]
    pub version: String,

    #[serde(default, deserialize_with = "lenient_list")]
    pub dependencies: Vec<String>,

    #[serde(rename = "allowed-capabilities", default, deserialize_with = "lenient_list")]
    pub allowed_capabilities: Vec<String>,
}

impl Default for SkillFrontmatter {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            version: default_version(),
            dependencies: Vec::new(),
            allowed_capabilities: Vec::new(),
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `1.0` arrives as a float
fn lenient_version<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value
        .and_then(scalar_text)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(default_version))
}

/// Lists arrive as sequences, comma-separated strings or `none`
fn lenient_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    let items: Vec<String> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items.into_iter().filter_map(scalar_text).collect(),
        Some(other) => scalar_text(other)
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .collect())
}

// ============================================================================
// SkillDocument
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SkillDocument {
    pub frontmatter: SkillFrontmatter,
    /// Markdown below the closing `---`
    pub body: String,
}

impl SkillDocument {
    pub fn new(frontmatter: SkillFrontmatter, body: impl Into<String>) -> Self {
        Self {
            frontmatter,
            body: body.into(),
        }
    }

    /// Split YAML frontmatter and body
    pub fn parse(content: &str) -> Result<Self> {
        let lines: Vec<&str> = content.trim_start().lines().collect();

        if lines.first().map(|l| l.trim()) != Some("---") {
            return Err(Error::InvalidInput(
                "Invalid SKILL.md: missing frontmatter".into(),
            ));
        }

        let end_idx = lines
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, line)| line.trim() == "---")
            .map(|(i, _)| i)
            .ok_or_else(|| Error::InvalidInput("Invalid SKILL.md: unclosed frontmatter".into()))?;

        let yaml_content = lines[1..end_idx].join("\n");
        let frontmatter: SkillFrontmatter = if yaml_content.trim().is_empty() {
            SkillFrontmatter::default()
        } else {
            serde_yaml::from_str(&yaml_content)
                .map_err(|e| Error::InvalidInput(format!("Invalid YAML frontmatter: {}", e)))?
        };

        let body = lines[(end_idx + 1)..].join("\n").trim().to_string();

        Ok(Self { frontmatter, body })
    }

    pub fn render(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.frontmatter)
            .map_err(|e| Error::Internal(format!("failed to render frontmatter: {}", e)))?;
        Ok(format!("---\n{}---\n\n{}\n", yaml, self.body.trim()))
    }

    /// Headings (`## ...`) present in the body, in order
    pub fn sections(&self) -> Vec<String> {
        let lines: Vec<&str> = self.body.lines().collect();
        headings(&lines)
            .into_iter()
            .filter_map(|(_, level, title)| (level == 2).then_some(title))
            .collect()
    }

    pub fn has_section(&self, title: &str) -> bool {
        self.sections().iter().any(|s| s.eq_ignore_ascii_case(title))
    }

    /// Code under `## Code`, or the first python block anywhere
    pub fn code(&self) -> Option<String> {
        let lines: Vec<&str> = self.body.lines().collect();
        match section_range(&lines, "Code") {
            Some((start, end)) => first_code_block(&lines[start..end]),
            None => first_code_block(&lines),
        }
    }

    /// Replace (or add) the `## Code` section with `code`
    pub fn set_code(&mut self, code: &str) {
        let block = format!("```python\n{}\n```", code.trim_end());
        let lines: Vec<&str> = self.body.lines().collect();

        self.body = match section_range(&lines, "Code") {
            Some((start, end)) => {
                let mut out = lines[..start].join("\n");
                out.push_str("\n\n");
                out.push_str(&block);
                out.push('\n');
                if end < lines.len() {
                    out.push('\n');
                    out.push_str(&lines[end..].join("\n"));
                }
                out
            }
            None => {
                let section = format!("## Code\n\n{}\n", block);
                match section_range(&lines, "Troubleshooting") {
                    // heading line sits right before the section content
                    Some((start, _)) => {
                        let heading = start - 1;
                        let mut out = lines[..heading].join("\n");
                        if !out.trim().is_empty() {
                            out = format!("{}\n\n", out.trim_end());
                        }
                        out.push_str(&section);
                        out.push('\n');
                        out.push_str(&lines[heading..].join("\n"));
                        out
                    }
                    None if self.body.trim().is_empty() => section,
                    None => format!("{}\n\n{}", self.body.trim_end(), section),
                }
            }
        };
    }

    /// Add a title and any missing non-code section, derived from the frontmatter
    pub fn fill_missing_sections(&mut self) {
        let lines: Vec<&str> = self.body.lines().collect();
        let has_title = headings(&lines).iter().any(|(_, level, _)| *level == 1);

        let mut body = self.body.trim().to_string();
        if !has_title {
            body = format!("# {}\n\n{}", title_case(&self.frontmatter.name), body)
                .trim_end()
                .to_string();
        }

        for section in SECTIONS.iter().filter(|s| **s != "Code") {
            if self.has_section(section) {
                continue;
            }
            let text = self.default_section_text(section);
            body = format!("{}\n\n## {}\n\n{}", body, section, text);
        }

        self.body = body;
    }

    fn default_section_text(&self, section: &str) -> String {
        let fm = &self.frontmatter;
        match section {
            "Description" => fm.description.clone(),
            "When to Use" => format!("Use when a task asks to: {}", fm.description),
            "How to Use" => {
                "Run the code block below. Results are printed to stdout and the final value \
                 is assigned to `result`."
                    .to_string()
            }
            "Dependencies" if fm.dependencies.is_empty() => {
                "None (standard library only).".to_string()
            }
            "Dependencies" => fm
                .dependencies
                .iter()
                .map(|d| format!("- {}", d))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => "Check that the dependencies are installed and any remote service is reachable."
                .to_string(),
        }
    }
}

// ============================================================================
// Markdown helpers
// ============================================================================

/// (line index, level, title) for headings outside fenced blocks
fn headings(lines: &[&str]) -> Vec<(usize, usize, String)> {
    let mut in_fence = false;
    let mut found = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=2).contains(&level) && trimmed[level..].starts_with(' ') {
            found.push((i, level, trimmed[level..].trim().to_string()));
        }
    }
    found
}

/// Line range of a `## title` section's content (heading excluded)
fn section_range(lines: &[&str], title: &str) -> Option<(usize, usize)> {
    let all = headings(lines);
    let pos = all
        .iter()
        .position(|(_, level, t)| *level == 2 && t.eq_ignore_ascii_case(title))?;
    let start = all[pos].0 + 1;
    let end = all.get(pos + 1).map(|(i, _, _)| *i).unwrap_or(lines.len());
    Some((start, end))
}

fn first_code_block(lines: &[&str]) -> Option<String> {
    let mut iter = lines.iter();
    while let Some(line) = iter.next() {
        let trimmed = line.trim();
        let Some(lang) = trimmed.strip_prefix("```") else {
            continue;
        };
        let lang = lang.trim().to_ascii_lowercase();
        let wanted = matches!(lang.as_str(), "" | "python" | "py" | "python3");

        let mut body = Vec::new();
        for inner in iter.by_ref() {
            if inner.trim() == "```" {
                break;
            }
            body.push(*inner);
        }

        let code = body.join("\n").trim().to_string();
        if wanted && !code.is_empty() {
            return Some(code);
        }
    }
    None
}

fn title_case(name: &str) -> String {
    name.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
