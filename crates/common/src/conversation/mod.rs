//! Conversation model shared by the control loop and the HTTP layer

use crate::wells::EntityExtractor;
use serde::{Deserialize, Serialize};

/// Author of a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Call arguments
    pub args: serde_json::Value,
    /// Unique call identifier
    pub id: String,
}

impl ToolCall {
    /// Query argument, if the call carries one
    pub fn query(&self) -> Option<&str> {
        self.args.get("query").and_then(|q| q.as_str())
    }
}

/// One conversation turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,

    /// Tool that produced this turn (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Call this turn answers (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Calls issued by this turn (assistant turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Assistant turn that records the calls it issued
    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::assistant("")
        }
    }

    /// Result of executing `call`
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(call.name.clone()),
            tool_call_id: Some(call.id.clone()),
            tool_calls: Vec::new(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_tool(&self) -> bool {
        self.role == Role::Tool
    }
}

/// Most recent user turn's text; falls back to the last turn, then empty
pub fn latest_user_question(turns: &[Turn]) -> &str {
    turns
        .iter()
        .rev()
        .find(|t| t.is_user())
        .or_else(|| turns.last())
        .map(|t| t.content.as_str())
        .unwrap_or("")
}

/// All tool-result texts joined by blank lines, or `None` when there are none
pub fn tool_context(turns: &[Turn]) -> Option<String> {
    let parts: Vec<&str> = turns
        .iter()
        .filter(|t| t.is_tool())
        .map(|t| t.content.as_str())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Most recent tool result, else the last turn's text
pub fn latest_context(turns: &[Turn]) -> &str {
    turns
        .iter()
        .rev()
        .find(|t| t.is_tool())
        .or_else(|| turns.last())
        .map(|t| t.content.as_str())
        .unwrap_or("")
}

/// How far back follow-up context inference looks
const RECENT_CONTEXT_WINDOW: usize = 25;

/// Infer (well, formation) from recent non-tool turns, newest first
///
/// Lets a follow-up such as "and the matrix density?" inherit the well and
/// formation named earlier. Tool turns are skipped since retrieved text often
/// mentions many wells.
pub fn infer_recent_context(
    turns: &[Turn],
    extractor: &dyn EntityExtractor,
) -> (Option<String>, Option<String>) {
    let mut well = None;
    let mut formation = None;

    let start = turns.len().saturating_sub(RECENT_CONTEXT_WINDOW);
    for turn in turns[start..].iter().rev().filter(|t| !t.is_tool()) {
        if well.is_none() {
            well = extractor.extract_well(&turn.content);
        }
        if formation.is_none() {
            formation = extractor.extract_formation(&turn.content);
        }
        if well.is_some() && formation.is_some() {
            break;
        }
    }

    (well, formation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wells::VolveEntityExtractor;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args: serde_json::json!({ "query": "porosity" }),
            id: format!("call_{}", name),
        }
    }

    #[test]
    fn test_latest_user_question_prefers_newest_user_turn() {
        let turns = vec![
            Turn::user("first"),
            Turn::tool_result(&call("a"), "ctx"),
            Turn::user("rewritten"),
            Turn::assistant("thinking"),
        ];
        assert_eq!(latest_user_question(&turns), "rewritten");
    }

    #[test]
    fn test_latest_user_question_fallbacks() {
        assert_eq!(latest_user_question(&[]), "");
        assert_eq!(latest_user_question(&[Turn::assistant("only")]), "only");
    }

    #[test]
    fn test_tool_context_joins_results() {
        let turns = vec![
            Turn::user("q"),
            Turn::tool_result(&call("a"), "one"),
            Turn::tool_result(&call("b"), "two"),
        ];
        assert_eq!(tool_context(&turns).as_deref(), Some("one\n\ntwo"));
        assert_eq!(tool_context(&turns[..1]), None);
        assert_eq!(latest_context(&turns), "two");
        assert_eq!(latest_context(&turns[..1]), "q");
    }

    #[test]
    fn test_infer_recent_context_skips_tool_turns() {
        let extractor = VolveEntityExtractor::default();
        let turns = vec![
            Turn::user("What is the porosity of 15/9-F-5 in the Hugin formation?"),
            Turn::tool_result(&call("a"), "15/9-F-1 Skagerak data"),
            Turn::user("and the matrix density?"),
        ];

        let (well, formation) = infer_recent_context(&turns, &extractor);
        assert_eq!(well.as_deref(), Some("15/9-F-5"));
        assert_eq!(formation.as_deref(), Some("Hugin"));
    }

    #[test]
    fn test_tool_call_query_arg() {
        assert_eq!(call("x").query(), Some("porosity"));
    }
}
