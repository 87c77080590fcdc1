//! Strict response-contract classification.
//!
//! When the model runs in a schema-constrained mode its whole turn is
//! expected to be one object:
//!
//! ```json
//! { "comment": "...", "next_action": "tool" | "final", "tool_call": { "tool": "...", "params": {} } }
//! ```
//!
//! Classification is deliberately three-way, not two-way:
//!
//! - [`ContractParse::Valid`] — the schema is satisfied.
//! - [`ContractParse::Invalid`] — the text *resembles* the contract (it
//!   carries a `next_action` marker) but violates it: missing or mistyped
//!   fields, `tool_call` absent for `"tool"`, `tool_call` present for
//!   `"final"`. The caller must escalate this into a corrective
//!   continuation, never fall back to legacy scanning.
//! - [`ContractParse::NotStructured`] — the text does not resemble the
//!   contract at all; the caller falls through silently to the legacy
//!   free-text encodings.

use serde_json::Value;

use crate::call::ToolCall;
use crate::parse::balanced::{balanced_objects, parse_object_lenient};

/// The action the model declared for this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// The turn carries a tool call to execute.
    Tool,
    /// The turn is the final answer; no tool call.
    Final,
}

/// A validated strict-contract response.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractResponse {
    /// The natural-language portion shown to the user.
    pub comment: String,
    /// What the model wants to happen next.
    pub next_action: NextAction,
    /// The call to execute when `next_action` is [`NextAction::Tool`].
    pub tool_call: Option<ToolCall>,
}

/// Outcome of attempting the strict contract parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractParse {
    /// Schema satisfied.
    Valid(ContractResponse),
    /// Resembles the contract but violates it; triggers a correction.
    Invalid {
        /// Which part of the contract was violated.
        reason: String,
    },
    /// Does not resemble the contract; fall back to legacy encodings.
    NotStructured,
}

/// The marker whose presence distinguishes a *broken* contract attempt from
/// text that never tried to follow the contract.
const CONTRACT_MARKER: &str = "\"next_action\"";

/// Classifies `text` against the strict contract.
pub fn classify(text: &str) -> ContractParse {
    for (_, candidate) in balanced_objects(text) {
        let Some(value) = parse_object_lenient(candidate) else {
            continue;
        };
        if value.get("next_action").is_some() {
            return validate(&value, candidate);
        }
    }

    // A contract marker in text that produced no parseable contract object
    // is a broken attempt, not legacy free text.
    if text.contains(CONTRACT_MARKER) {
        return ContractParse::Invalid {
            reason: "response contains 'next_action' but is not a parseable contract object"
                .to_string(),
        };
    }

    ContractParse::NotStructured
}

fn validate(value: &Value, raw: &str) -> ContractParse {
    let invalid = |reason: &str| ContractParse::Invalid {
        reason: reason.to_string(),
    };

    let comment = match value.get("comment") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return invalid("'comment' must be a string"),
        None => return invalid("missing required field 'comment'"),
    };

    let next_action = match value.get("next_action") {
        Some(Value::String(s)) if s == "tool" => NextAction::Tool,
        Some(Value::String(s)) if s == "final" => NextAction::Final,
        Some(Value::String(_)) => {
            return invalid("'next_action' must be \"tool\" or \"final\"");
        }
        _ => return invalid("'next_action' must be a string"),
    };

    let tool_call = match (next_action, value.get("tool_call")) {
        (NextAction::Tool, None) => {
            return invalid("'next_action' is \"tool\" but 'tool_call' is missing");
        }
        (NextAction::Final, Some(_)) => {
            return invalid("'next_action' is \"final\" but 'tool_call' is present");
        }
        (NextAction::Final, None) => None,
        (NextAction::Tool, Some(call)) => {
            let tool = match call.get("tool") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                _ => return invalid("'tool_call.tool' must be a non-empty string"),
            };
            let params = match call.get("params") {
                Some(p @ Value::Object(_)) => p.clone(),
                Some(_) => return invalid("'tool_call.params' must be an object"),
                None => return invalid("'tool_call.params' is missing"),
            };
            Some(ToolCall::new(tool, params, raw))
        }
    };

    ContractParse::Valid(ContractResponse {
        comment,
        next_action,
        tool_call,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_tool_response() {
        let text = r#"{"comment": "Reading the file.", "next_action": "tool", "tool_call": {"tool": "get_code", "params": {"path": "a.rs"}}}"#;
        let ContractParse::Valid(resp) = classify(text) else {
            panic!("expected Valid");
        };
        assert_eq!(resp.comment, "Reading the file.");
        assert_eq!(resp.next_action, NextAction::Tool);
        let call = resp.tool_call.unwrap();
        assert_eq!(call.tool_name, "get_code");
        assert_eq!(call.params, json!({"path": "a.rs"}));
    }

    #[test]
    fn test_valid_final_response() {
        let text = r#"{"comment": "All done.", "next_action": "final"}"#;
        let ContractParse::Valid(resp) = classify(text) else {
            panic!("expected Valid");
        };
        assert_eq!(resp.next_action, NextAction::Final);
        assert!(resp.tool_call.is_none());
    }

    #[test]
    fn test_missing_tool_call_is_invalid_not_unstructured() {
        let text = r#"{"comment": "ok", "next_action": "tool"}"#;
        assert!(matches!(classify(text), ContractParse::Invalid { .. }));
    }

    #[test]
    fn test_tool_call_on_final_is_invalid() {
        let text = r#"{"comment": "ok", "next_action": "final", "tool_call": {"tool": "t", "params": {}}}"#;
        assert!(matches!(classify(text), ContractParse::Invalid { .. }));
    }

    #[test]
    fn test_missing_comment_is_invalid() {
        let text = r#"{"next_action": "final"}"#;
        assert!(matches!(classify(text), ContractParse::Invalid { .. }));
    }

    #[test]
    fn test_unknown_next_action_is_invalid() {
        let text = r#"{"comment": "x", "next_action": "pause"}"#;
        assert!(matches!(classify(text), ContractParse::Invalid { .. }));
    }

    #[test]
    fn test_free_text_is_not_structured() {
        assert_eq!(
            classify("Just a plain sentence with no JSON."),
            ContractParse::NotStructured
        );
        assert_eq!(
            classify(r#"Legacy call: {"tool": "search", "params": {}}"#),
            ContractParse::NotStructured
        );
    }

    #[test]
    fn test_marker_without_parseable_object_is_invalid() {
        let text = r#"{"comment": "oops, "next_action": "tool""#;
        assert!(matches!(classify(text), ContractParse::Invalid { .. }));
    }

    #[test]
    fn test_contract_object_after_prose() {
        let text = "Here is my answer.\n{\"comment\": \"done\", \"next_action\": \"final\"}";
        assert!(matches!(classify(text), ContractParse::Valid(_)));
    }

    #[test]
    fn test_repairs_newlines_in_comment() {
        let text = "{\"comment\": \"line one\nline two\", \"next_action\": \"final\"}";
        let ContractParse::Valid(resp) = classify(text) else {
            panic!("expected Valid after repair");
        };
        assert_eq!(resp.comment, "line one\nline two");
    }
}
