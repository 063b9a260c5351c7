//! Output schemas per call site

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing call site reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingReply {
    pub intent: Intent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Conversational answer, nothing to execute
    Direct,
    /// Something to execute
    Task,
}

/// Decomposition call site reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionReply {
    /// Missing means "decide from the subtask count"
    #[serde(default)]
    pub parallel: Option<bool>,
    pub subtasks: Vec<ProposedSubtask>,
}

impl DecompositionReply {
    pub fn is_parallel(&self) -> bool {
        self.parallel.unwrap_or(self.subtasks.len() > 1)
    }
}

/// One subtask as proposed by the oracle, before planner validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedSubtask {
    /// Oracles return strings or numbers here
    #[serde(default)]
    pub id: Option<Value>,
    pub description: String,
    #[serde(default)]
    pub code_hint: Option<String>,
}

impl ProposedSubtask {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: Some(Value::String(id.to_string())),
            description: description.to_string(),
            code_hint: None,
        }
    }

    /// Id as text; `None` when absent or empty
    pub fn id_text(&self) -> Option<String> {
        let text = match self.id.as_ref()? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Retrieved skill passed as context to code generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillContext {
    pub name: String,
    pub description: String,
    pub code: String,
    pub score: f32,
}

/// Input to the documentation call site
#[derive(Debug, Clone, Default)]
pub struct DocumentationRequest {
    pub description: String,
    pub code: String,
    pub dependencies: Vec<String>,
    /// Name to keep, if one is already known
    pub suggested_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decomposition_parses_numeric_ids() {
        let reply: DecompositionReply = serde_json::from_str(
            r#"{"subtasks": [{"id": 1, "description": "a"}, {"description": "b", "code_hint": "x"}]}"#,
        )
        .unwrap();
        assert!(reply.is_parallel());
        assert_eq!(reply.subtasks[0].id_text().as_deref(), Some("1"));
        assert_eq!(reply.subtasks[1].id_text(), None);
        assert_eq!(reply.subtasks[1].code_hint.as_deref(), Some("x"));
    }

    #[test]
    fn test_routing_reply() {
        let reply: RoutingReply = serde_json::from_str(r#"{"intent": "task"}"#).unwrap();
        assert_eq!(reply.intent, Intent::Task);
        assert!(serde_json::from_str::<RoutingReply>(r#"{"intent": "maybe"}"#).is_err());
    }
}
