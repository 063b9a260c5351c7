//! Prompt templates per call site
//!
//! Each builder returns `(system, prompt)`.

use crate::schema::{DocumentationRequest, SkillContext};

/// Characters of skill code included as generation context
const SKILL_CODE_PREVIEW: usize = 1500;

pub fn routing(text: &str) -> (String, String) {
    let system = "You classify user requests for an agent that can write and run Python code. \
                  Reply with JSON only."
        .to_string();
    let prompt = format!(
        r#"Request: {text}

Does this request need code to be written and executed (data processing, calculations,
fetching information, generating files), or is it conversational?

Respond ONLY with JSON:
{{"intent": "task"}} or {{"intent": "direct"}}"#
    );
    (system, prompt)
}

pub fn decomposition(text: &str) -> (String, String) {
    let system = "You split tasks into independent units of work. Reply with JSON only.".to_string();
    let prompt = format!(
        r#"Analyze this task and decide whether it can be split into INDEPENDENT subtasks that
can run at the same time without sharing results:

Task: {text}

If the task contains several independent operations (e.g. "fetch Bitcoin AND Ethereum prices",
"generate 3 different charts"), list one subtask per operation.
If the steps depend on each other, or there is only one operation, return a single subtask.

Respond ONLY with valid JSON, no explanations:
{{
  "parallel": true,
  "subtasks": [
    {{"id": "task_1", "description": "...", "code_hint": "..."}},
    {{"id": "task_2", "description": "...", "code_hint": "..."}}
  ]
}}"#
    );
    (system, prompt)
}

fn code_rules() -> &'static str {
    r#"RULES:
- Write a single self-contained Python 3 script.
- ALWAYS print() the results; output that is not printed is lost.
- Also assign the final answer to a top-level variable named `result`.
- The sandbox is headless: never call plt.show(); save figures under /workspace or /tmp
  and print the path.
- Do not delete files, spawn shells, or write outside /workspace and /tmp.
- Import what you need; common third-party packages are installed on demand."#
}

pub fn code_generation(
    description: &str,
    code_hint: Option<&str>,
    skills: &[SkillContext],
) -> (String, String) {
    let system = "You are an expert Python engineer. You answer with one ```python code block and \
                  nothing else."
        .to_string();

    let mut prompt = format!("TASK: {description}\n");
    if let Some(hint) = code_hint.filter(|h| !h.trim().is_empty()) {
        prompt.push_str(&format!("HINT: {hint}\n"));
    }
    prompt.push('\n');
    prompt.push_str(code_rules());
    prompt.push('\n');

    if !skills.is_empty() {
        prompt.push_str(
            "\nREFERENCE SKILLS (verified code from earlier runs; reuse or adapt when relevant):\n",
        );
        for skill in skills {
            let code: String = skill.code.chars().take(SKILL_CODE_PREVIEW).collect();
            prompt.push_str(&format!(
                "\n### {} (similarity {:.2})\n{}\n```python\n{}\n```\n",
                skill.name, skill.score, skill.description, code
            ));
        }
    }

    prompt.push_str("\nRespond with ONLY a ```python code block.");
    (system, prompt)
}

pub fn repair(description: &str, code: &str, failure: &str) -> (String, String) {
    let system = "You fix broken Python scripts. You answer with one ```python code block and \
                  nothing else."
        .to_string();
    let prompt = format!(
        r#"TASK: {description}

The following code failed.

```python
{code}
```

FAILURE:
{failure}

Fix the cause of the failure. If it timed out, make it faster or bound its work.
Keep the behaviour the task asks for.

{rules}

Respond with ONLY the corrected ```python code block."#,
        rules = code_rules()
    );
    (system, prompt)
}

pub fn refine(description: &str, code: &str, feedback: &str) -> (String, String) {
    let system = "You harden verified Python scripts so they can be stored as reusable skills. \
                  You answer with one ```python code block and nothing else."
        .to_string();
    let prompt = format!(
        r#"TASK: {description}

This code works but was rejected during verification:

```python
{code}
```

VERIFICATION FEEDBACK:
{feedback}

Rewrite it so that it passes verification while producing the same result.

{rules}

Respond with ONLY the rewritten ```python code block."#,
        rules = code_rules()
    );
    (system, prompt)
}

pub fn documentation(request: &DocumentationRequest) -> (String, String) {
    let system = "You are a technical writer documenting reusable Python skills. You answer with \
                  a Markdown document that starts with YAML frontmatter."
        .to_string();

    let name_hint = request
        .suggested_name
        .as_deref()
        .unwrap_or("infer a kebab-case name of 2-4 words, e.g. fetch-bitcoin-price");
    let deps = if request.dependencies.is_empty() {
        "none detected".to_string()
    } else {
        request.dependencies.join(", ")
    };

    let prompt = format!(
        r#"Document this verified Python skill.

Skill name: {name_hint}
Task description: {description}
Detected dependencies: {deps}

```python
{code}
```

OUTPUT FORMAT:
---
name: kebab-case-name
description: one-sentence summary
version: 1.0.0
dependencies: [pypi, packages]
allowed-capabilities: [e.g. network, filesystem-read, filesystem-write, compute]
---

# Title Case Name

## Description
## When to Use
## How to Use
## Dependencies
## Code
(the code above, unchanged, in a ```python block)
## Troubleshooting

Respond with ONLY the Markdown document, starting with ---."#,
        description = request.description,
        code = request.code,
    );
    (system, prompt)
}

/// `results` lists every subtask outcome, failures included
pub fn synthesis(text: &str, results: &str) -> (String, String) {
    let system = "You report the outcome of tasks that were executed on the user's behalf. \
                  You only state what the results show."
        .to_string();
    let prompt = format!(
        r#"The user asked: {text}

Several subtasks were executed in parallel. Their ACTUAL results:

{results}

Answer the user's request from these results:
- Report only what the results show. Never invent numbers or data.
- State clearly which subtasks failed and why.
- Compare the findings where that helps answer the question.
- Keep it concise. Leave out code unless it is needed."#
    );
    (system, prompt)
}

pub fn conversation(text: &str) -> (String, String) {
    let system = "You are a concise, helpful assistant. Keep answers brief.".to_string();
    (system, text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_includes_skills_and_hint() {
        let skills = vec![SkillContext {
            name: "calc-pi".into(),
            description: "Calculate pi".into(),
            code: "print(3.14)".into(),
            score: 0.91,
        }];
        let (_, prompt) = code_generation("compute pi", Some("use math"), &skills);
        assert!(prompt.contains("HINT: use math"));
        assert!(prompt.contains("### calc-pi (similarity 0.91)"));
        assert!(prompt.contains("print(3.14)"));
    }

    #[test]
    fn test_generation_without_skills() {
        let (_, prompt) = code_generation("compute pi", None, &[]);
        assert!(!prompt.contains("REFERENCE SKILLS"));
        assert!(!prompt.contains("HINT"));
    }

    #[test]
    fn test_synthesis_embeds_results() {
        let (_, prompt) = synthesis("compare prices", "Task 1: fetch btc\nResult:\n42");
        assert!(prompt.starts_with("The user asked: compare prices"));
        assert!(prompt.contains("Result:\n42"));
        assert!(prompt.contains("Never invent"));
    }

    #[test]
    fn test_documentation_keeps_suggested_name() {
        let (_, prompt) = documentation(&DocumentationRequest {
            description: "d".into(),
            code: "print(1)".into(),
            dependencies: vec!["numpy".into()],
            suggested_name: Some("make-table".into()),
        });
        assert!(prompt.contains("Skill name: make-table"));
        assert!(prompt.contains("Detected dependencies: numpy"));
    }
}
