//! Response extraction
//!
//! Oracle replies are free text. These helpers pull out the part a call site
//! actually consumes: a code body or a JSON object.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Keywords that make a bare block look like code
const CODE_HINTS: &[&str] = &["import ", "def ", "print(", "for ", "if ", "=", "return "];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("extraction pattern is a valid regex"))
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?is)<think(?:ing)?>.*?</think(?:ing)?>")
}

fn python_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)```(?:python|py|python3)[ \t]*\r?\n(.*?)```")
}

fn any_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```")
}

fn inline_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)```(?:python)?(.*?)```")
}

fn json_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)```(?:json)?\s*(\{.*?\})\s*```")
}

/// Remove `<think>…</think>` reasoning blocks, and a dangling opener's tail
pub fn strip_thinking(text: &str) -> String {
    let stripped = think_re().replace_all(text, "");
    let lower = stripped.to_ascii_lowercase();
    // unterminated block: keep what came before it
    match lower.find("<think") {
        Some(idx) if !lower[idx..].contains("</think") => stripped[..idx].trim().to_string(),
        _ => stripped.trim().to_string(),
    }
}

fn looks_like_code(text: &str) -> bool {
    CODE_HINTS.iter().any(|kw| text.contains(kw))
}

/// Extract a python code body
///
/// Precedence: python-tagged fenced block (longest), then any fenced block that
/// looks like code, then a single-line fenced block, then the whole reply if it
/// looks like code and has no prose fences.
pub fn extract_code(text: &str) -> Option<String> {
    let text = strip_thinking(text);
    if text.is_empty() {
        return None;
    }

    let longest = |re: &Regex| -> Option<String> {
        re.captures_iter(&text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .max_by_key(|s| s.len())
    };

    if let Some(code) = longest(python_block_re()) {
        return Some(code);
    }

    let mut generic: Vec<String> = any_block_re()
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    generic.sort_by_key(|s| std::cmp::Reverse(s.len()));
    if let Some(code) = generic.into_iter().find(|s| looks_like_code(s)) {
        return Some(code);
    }

    if let Some(code) = longest(inline_block_re()).filter(|s| looks_like_code(s)) {
        return Some(code);
    }

    if !text.contains("```") && looks_like_code(&text) && !text.contains("\n\n\n") {
        return Some(text);
    }

    None
}

/// Extract the first JSON object in a reply
pub fn extract_json(text: &str) -> Option<Value> {
    let text = strip_thinking(text);

    for caps in json_block_re().captures_iter(&text) {
        if let Some(m) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    // scan balanced braces from each '{'
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[open..=close]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
        start = open + 1;
    }

    None
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether a documentation reply opens with YAML frontmatter
pub fn has_frontmatter(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("---") && trimmed[3..].contains("\n---")
}

/// Documentation body starting at its frontmatter (drops any preamble or outer fence)
pub fn extract_document(text: &str) -> Option<String> {
    let text = strip_thinking(text);
    let start = text.find("---")?;
    let fenced = text[..start].contains("```");
    let mut doc = text[start..].trim_end().to_string();
    if fenced && doc.ends_with("```") {
        doc.truncate(doc.len() - 3);
    }
    has_frontmatter(&doc).then(|| doc.trim_end().to_string())
}
