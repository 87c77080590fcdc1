//! Core vocabulary: tool calls, call identity, results, and plans.
//!
//! Everything downstream — deduplication, idempotent replay, the execution
//! registry — keys off [`CallKey`], a deterministic identity derived from the
//! tool name plus a canonical serialization of the parameters. Two calls that
//! mean the same thing produce the same key even if the model emitted their
//! parameter objects with keys in a different order.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of steps retained in a [`Plan`]. Payloads carrying more
/// steps are truncated to the first twelve.
pub const PLAN_MAX_STEPS: usize = 12;

/// Operating mode for a conversation.
///
/// `Plan` restricts execution to investigation-safe (read-only) tools;
/// `Act` places no restriction. The mode is read from the enclosing
/// conversation context and passed into each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Investigation-only: read-only tools, plan payloads accepted.
    Plan,
    /// Full read/write: all cataloged tools, strict-contract parsing first.
    Act,
}

/// A single tool invocation as parsed from model output.
///
/// Immutable once parsed. `raw_text` preserves the exact substring the call
/// was extracted from, so display text can be produced by removal rather
/// than re-rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The name of the tool to invoke.
    pub tool_name: String,
    /// The parameter object. Always a JSON object for calls produced by the
    /// parser; validation rejects anything else.
    pub params: Value,
    /// The exact text span this call was parsed from.
    pub raw_text: String,
}

impl ToolCall {
    /// Creates a call from parts.
    pub fn new(
        tool_name: impl Into<String>,
        params: Value,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            raw_text: raw_text.into(),
        }
    }

    /// The deduplication/replay identity for this call.
    pub fn key(&self) -> CallKey {
        CallKey::for_call(&self.tool_name, &self.params)
    }
}

/// Deterministic identity for a tool call.
///
/// Derived from the tool name plus a canonical (recursively key-sorted)
/// serialization of the parameters. This is the *sole* identity used for
/// deduplication and idempotent replay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallKey(String);

impl CallKey {
    /// Computes the key for a tool name and parameter value.
    pub fn for_call(tool_name: &str, params: &Value) -> Self {
        let mut canon = String::with_capacity(tool_name.len() + 32);
        canon.push_str(tool_name);
        canon.push(':');
        write_canonical(params, &mut canon);
        Self(canon)
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes `value` with object keys sorted recursively.
///
/// `serde_json::to_string` preserves insertion order for `Map`, which would
/// make `{"a":1,"b":2}` and `{"b":2,"a":1}` distinct; sorting keys at every
/// level makes the serialization order-independent.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys serialize as JSON strings so delimiters inside them
                // cannot collide with the structure.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// The terminal outcome of one tool invocation.
///
/// Immutable once stored in the execution registry; retained for the
/// remainder of the conversation to support idempotent replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The tool that produced this result.
    pub tool_name: String,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// The tool's output, when `success` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The failure description, when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result carrying the tool's output.
    pub fn ok(tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// A failed result carrying an error description.
    pub fn failed(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Status of a single plan step, mutated by step-status callbacks during
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStepStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// One numbered step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable identifier, derived from the plan id and step number.
    pub id: String,
    /// 1-based position in the plan.
    pub number: u32,
    /// What this step does.
    pub description: String,
    /// Current execution status.
    pub status: PlanStepStatus,
}

/// A structured plan produced while operating in `Plan` mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Stable identifier, derived from the source turn's content hash.
    pub id: String,
    /// Overall description of the plan.
    pub description: String,
    /// Ordered steps, capped at [`PLAN_MAX_STEPS`].
    pub steps: Vec<PlanStep>,
}

/// Set of content hashes for turns that have already been processed.
///
/// Protects against duplicate "stream ended" notifications for the same
/// assembled text: the first notification records the hash before any side
/// effects, and later notifications for identical content become no-ops.
#[derive(Debug, Default)]
pub struct ProcessedHashes {
    hashes: HashSet<u64>,
}

impl ProcessedHashes {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the hash of `text`, returning `false` if it was already
    /// present (the turn was handled before).
    pub fn record(&mut self, text: &str) -> bool {
        self.hashes.insert(content_hash(text))
    }

    /// Whether `text` has been recorded.
    pub fn contains(&self, text: &str) -> bool {
        self.hashes.contains(&content_hash(text))
    }
}

/// Deterministic hash of a turn's assembled text.
pub(crate) fn content_hash(text: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
