//! Capability policy: which tools may run under which mode.
//!
//! The catalog holds built-in tools plus any dynamically registered remote
//! tools, each declaring whether it is safe during investigation
//! ([`Mode::Plan`]) and which parameters it requires. `Act` mode places no
//! restriction. Unknown tools fail closed in `Plan` mode.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::call::{Mode, ToolCall};
use crate::error::EngineError;

/// One catalog entry.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// The tool's wire name.
    pub name: String,
    /// Whether the tool is read-only and therefore allowed in plan mode.
    pub plan_safe: bool,
    /// Parameters that must be present (and non-empty, for strings).
    pub required_params: Vec<String>,
}

impl ToolSpec {
    /// Creates a spec from parts.
    pub fn new(name: impl Into<String>, plan_safe: bool, required_params: &[&str]) -> Self {
        Self {
            name: name.into(),
            plan_safe,
            required_params: required_params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// The capability gate consulted before every dispatch.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    tools: BTreeMap<String, ToolSpec>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CapabilityPolicy {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// The built-in catalog: read-only investigation tools plus the
    /// read/write tools reserved for act mode.
    pub fn with_builtins() -> Self {
        let mut policy = Self::empty();
        policy.register(ToolSpec::new("get_code", true, &[]));
        policy.register(ToolSpec::new("search", true, &["query"]));
        policy.register(ToolSpec::new("web_fetch", true, &["url"]));
        policy.register(ToolSpec::new("modify_code", false, &["code"]));
        policy.register(ToolSpec::new("create_document", false, &["title"]));
        policy.register(ToolSpec::new("update_document", false, &["document_id"]));
        policy
    }

    /// Adds or replaces a catalog entry (e.g. a discovered remote tool).
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), spec);
    }

    /// Tool names permitted under `mode`.
    pub fn allow_set(&self, mode: Mode) -> Vec<&str> {
        self.tools
            .values()
            .filter(|spec| mode == Mode::Act || spec.plan_safe)
            .map(|spec| spec.name.as_str())
            .collect()
    }

    /// Tool names blocked under `mode`.
    pub fn block_set(&self, mode: Mode) -> Vec<&str> {
        self.tools
            .values()
            .filter(|spec| mode == Mode::Plan && !spec.plan_safe)
            .map(|spec| spec.name.as_str())
            .collect()
    }

    /// Checks whether `tool_name` may run under `mode`.
    ///
    /// Act mode admits anything, including tools not in the catalog. Plan
    /// mode admits only cataloged tools flagged `plan_safe`.
    pub fn validate(&self, tool_name: &str, mode: Mode) -> Result<(), String> {
        if mode == Mode::Act {
            return Ok(());
        }
        match self.tools.get(tool_name) {
            Some(spec) if spec.plan_safe => Ok(()),
            Some(_) => Err(format!(
                "tool '{tool_name}' mutates state and is blocked in plan mode"
            )),
            None => Err(format!(
                "unknown tool '{tool_name}' is blocked in plan mode"
            )),
        }
    }

    /// Full pre-dispatch validation of a parsed call: non-empty name,
    /// object params, required fields present, mode check.
    pub fn validate_call(&self, call: &ToolCall, mode: Mode) -> Result<(), EngineError> {
        let reject = |reason: String| EngineError::Validation {
            tool_name: call.tool_name.clone(),
            reason,
        };

        if call.tool_name.is_empty() {
            return Err(reject("tool name is empty".to_string()));
        }
        let Some(params) = call.params.as_object() else {
            return Err(reject("params is not an object".to_string()));
        };

        if let Some(spec) = self.tools.get(&call.tool_name) {
            for required in &spec.required_params {
                match params.get(required) {
                    None | Some(Value::Null) => {
                        return Err(reject(format!("missing required parameter '{required}'")));
                    }
                    Some(Value::String(s)) if s.is_empty() => {
                        return Err(reject(format!("required parameter '{required}' is empty")));
                    }
                    Some(_) => {}
                }
            }
        }

        self.validate(&call.tool_name, mode).map_err(reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_mode_allows_read_only_tools() {
        let policy = CapabilityPolicy::with_builtins();
        assert!(policy.validate("get_code", Mode::Plan).is_ok());
        assert!(policy.validate("search", Mode::Plan).is_ok());
        assert!(policy.validate("web_fetch", Mode::Plan).is_ok());
    }

    #[test]
    fn test_plan_mode_blocks_write_tools() {
        let policy = CapabilityPolicy::with_builtins();
        assert!(policy.validate("modify_code", Mode::Plan).is_err());
        assert!(policy.validate("create_document", Mode::Plan).is_err());
    }

    #[test]
    fn test_plan_mode_fails_closed_for_unknown_tools() {
        let policy = CapabilityPolicy::with_builtins();
        assert!(policy.validate("mystery_tool", Mode::Plan).is_err());
    }

    #[test]
    fn test_act_mode_is_unrestricted() {
        let policy = CapabilityPolicy::with_builtins();
        assert!(policy.validate("modify_code", Mode::Act).is_ok());
        assert!(policy.validate("mystery_tool", Mode::Act).is_ok());
    }

    #[test]
    fn test_allow_and_block_sets_partition() {
        let policy = CapabilityPolicy::with_builtins();
        let allowed = policy.allow_set(Mode::Plan);
        let blocked = policy.block_set(Mode::Plan);
        assert!(allowed.contains(&"get_code"));
        assert!(blocked.contains(&"modify_code"));
        assert!(!allowed.iter().any(|t| blocked.contains(t)));
        assert!(policy.block_set(Mode::Act).is_empty());
    }

    #[test]
    fn test_registered_remote_tool_respects_flag() {
        let mut policy = CapabilityPolicy::with_builtins();
        policy.register(ToolSpec::new("remote_lookup", true, &["key"]));
        assert!(policy.validate("remote_lookup", Mode::Plan).is_ok());
    }

    #[test]
    fn test_validate_call_requires_nonempty_required_string() {
        let policy = CapabilityPolicy::with_builtins();
        let call = ToolCall::new("modify_code", json!({"code": ""}), "");
        let err = policy.validate_call(&call, Mode::Act).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        let call = ToolCall::new("modify_code", json!({"code": "fn main() {}"}), "");
        assert!(policy.validate_call(&call, Mode::Act).is_ok());
    }

    #[test]
    fn test_validate_call_rejects_missing_required_param() {
        let policy = CapabilityPolicy::with_builtins();
        let call = ToolCall::new("search", json!({}), "");
        assert!(policy.validate_call(&call, Mode::Act).is_err());
    }

    #[test]
    fn test_validate_call_rejects_non_object_params() {
        let policy = CapabilityPolicy::with_builtins();
        let call = ToolCall::new("get_code", json!("nope"), "");
        assert!(policy.validate_call(&call, Mode::Act).is_err());
    }

    #[test]
    fn test_validate_call_rejects_empty_name() {
        let policy = CapabilityPolicy::with_builtins();
        let call = ToolCall::new("", json!({}), "");
        assert!(policy.validate_call(&call, Mode::Act).is_err());
    }
}
