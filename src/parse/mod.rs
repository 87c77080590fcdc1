//! Tool-call extraction across the supported wire encodings.
//!
//! Model turns arrive as free text that may carry tool invocations in any
//! of four shapes:
//!
//! 1. a bare `{"tool": ..., "params": ...}` object anywhere in the text;
//! 2. a fenced code block tagged with a tool name, body = JSON params;
//! 3. an inline `<tool_call name="X" params='{...}'/>` tag;
//! 4. the strict contract object (see [`contract`]).
//!
//! The legacy encodings (1–3) are parsed independently and merged in
//! document order, deduplicated by [`CallKey`] with first-seen-wins
//! semantics. The strict contract is a separate entry point
//! ([`contract::classify`]) because its failure modes drive different
//! orchestrator behavior.

pub mod balanced;
pub mod contract;

use serde_json::Value;

use crate::call::{
    content_hash, CallKey, Plan, PlanStep, PlanStepStatus, ToolCall, PLAN_MAX_STEPS,
};
use crate::parse::balanced::{balanced_objects, parse_object_lenient};

pub use contract::{classify as classify_contract, ContractParse, ContractResponse, NextAction};

/// Fence tags that name a language rather than a tool. A fence with one of
/// these tags only yields a call if its body is itself a bare
/// `{"tool", "params"}` object.
const NON_TOOL_TAGS: &[&str] = &[
    "json", "javascript", "typescript", "python", "rust", "go", "java", "c", "cpp", "csharp",
    "html", "css", "xml", "yaml", "toml", "sql", "bash", "sh", "shell", "text", "txt", "markdown",
    "md", "plaintext", "diff",
];

struct Extraction {
    /// Calls in document order, deduplicated by key.
    calls: Vec<ToolCall>,
    /// Byte spans of every recognized encoding, for display-text stripping.
    /// Includes spans that deduplicated away or carry no call (plan
    /// payloads, contract objects).
    spans: Vec<(usize, usize)>,
}

/// Extracts all legacy-encoded tool calls from `text`.
///
/// Incomplete candidates (unbalanced braces, unterminated fences) are
/// silently skipped: mid-stream fragments must never trigger execution.
pub fn extract_calls(text: &str) -> Vec<ToolCall> {
    scan(text).calls
}

fn scan(text: &str) -> Extraction {
    let mut found: Vec<(usize, usize, Option<ToolCall>)> = Vec::new();

    // Pass 1: fenced blocks. Runs first so bare-object matches inside a
    // fence body attach to the enclosing fence span.
    for (start, end, tag, body) in fenced_blocks(text) {
        let call = fence_call(tag, body, &text[start..end]);
        found.push((start, end, call));
    }

    // Pass 2: bare objects, skipping any inside an already-claimed span.
    for (offset, object) in balanced_objects(text) {
        if found
            .iter()
            .any(|(s, e, _)| offset >= *s && offset < *e)
        {
            continue;
        }
        let Some(value) = parse_object_lenient(object) else {
            continue;
        };
        if let Some(call) = bare_call(&value, object) {
            found.push((offset, offset + object.len(), Some(call)));
        } else if value.get("plan").is_some() || value.get("next_action").is_some() {
            // Structured payloads are not calls but are stripped from the
            // display text all the same.
            found.push((offset, offset + object.len(), None));
        }
    }

    // Pass 3: inline tags.
    for (start, end, call) in inline_tag_calls(text) {
        found.push((start, end, Some(call)));
    }

    found.sort_by_key(|(start, _, _)| *start);

    let mut seen: Vec<CallKey> = Vec::new();
    let mut calls = Vec::new();
    let mut spans = Vec::new();
    for (start, end, call) in found {
        spans.push((start, end));
        if let Some(call) = call {
            let key = call.key();
            if !seen.contains(&key) {
                seen.push(key);
                calls.push(call);
            }
        }
    }

    Extraction { calls, spans }
}

fn bare_call(value: &Value, raw: &str) -> Option<ToolCall> {
    let tool = value.get("tool")?.as_str()?;
    let params = value.get("params")?;
    if tool.is_empty() || !params.is_object() {
        return None;
    }
    Some(ToolCall::new(tool, params.clone(), raw))
}

fn fence_call(tag: &str, body: &str, raw: &str) -> Option<ToolCall> {
    let value = parse_object_lenient(body.trim())?;

    // A bare tool object inside any fence wins over the tag.
    if let Some(call) = bare_call(&value, raw) {
        return Some(call);
    }

    if tag.is_empty() || NON_TOOL_TAGS.contains(&tag.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(ToolCall::new(tag, value, raw))
}

/// Yields `(start, end, tag, body)` for each *closed* fenced block.
fn fenced_blocks(text: &str) -> Vec<(usize, usize, &str, &str)> {
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find("```") {
        let start = search_from + rel;
        let after_ticks = start + 3;
        let Some(line_end_rel) = text[after_ticks..].find('\n') else {
            break;
        };
        let tag = text[after_ticks..after_ticks + line_end_rel].trim();
        let body_start = after_ticks + line_end_rel + 1;
        let Some(close_rel) = text[body_start..].find("```") else {
            break; // unterminated fence: incomplete mid-stream
        };
        let body = &text[body_start..body_start + close_rel];
        let end = body_start + close_rel + 3;
        blocks.push((start, end, tag, body));
        search_from = end;
    }

    blocks
}

/// Yields `(start, end, call)` for each well-formed inline tag.
fn inline_tag_calls(text: &str) -> Vec<(usize, usize, ToolCall)> {
    let mut calls = Vec::new();
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find("<tool_call") {
        let start = search_from + rel;
        let Some(close_rel) = text[start..].find('>') else {
            break;
        };
        let end = start + close_rel + 1;
        let tag_body = &text[start..end];
        search_from = end;

        let Some(name) = read_attr(tag_body, "name") else {
            continue;
        };
        let Some(params_raw) = read_attr(tag_body, "params") else {
            continue;
        };
        let Ok(params @ Value::Object(_)) = serde_json::from_str::<Value>(&params_raw) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        calls.push((start, end, ToolCall::new(name, params, &text[start..end])));
    }

    calls
}

/// Reads a quoted attribute value out of an inline tag body. Accepts single
/// or double quotes; the value runs to the next matching quote.
fn read_attr(tag_body: &str, attr: &str) -> Option<String> {
    let marker = format!("{attr}=");
    let at = tag_body.find(&marker)? + marker.len();
    let rest = &tag_body[at..];
    let quote = rest.chars().next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let inner = &rest[quote.len_utf8()..];
    let close = inner.find(quote)?;
    Some(inner[..close].to_string())
}

/// Returns `text` with every recognized encoding removed and runs of blank
/// lines collapsed. This is the natural-language portion shown to the user.
pub fn strip_tool_calls(text: &str) -> String {
    let spans = scan(text).spans;
    let mut kept = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if start > cursor {
            kept.push_str(&text[cursor..start]);
        }
        cursor = cursor.max(end);
    }
    kept.push_str(&text[cursor..]);

    collapse_blank_lines(&kept)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out.trim().to_string()
}

/// Parses a plan payload `{"plan": {"description", "steps": [...]}}` out of
/// `text`. Steps beyond [`PLAN_MAX_STEPS`] are dropped. The plan id derives
/// from the turn's content hash, so replaying the same turn yields the same
/// ids.
pub fn parse_plan(text: &str) -> Option<Plan> {
    for (_, object) in balanced_objects(text) {
        let Some(value) = parse_object_lenient(object) else {
            continue;
        };
        let Some(plan) = value.get("plan") else {
            continue;
        };
        let description = plan
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(raw_steps) = plan.get("steps").and_then(Value::as_array) else {
            continue;
        };

        let plan_id = format!("plan-{:016x}", content_hash(text));
        let steps: Vec<PlanStep> = raw_steps
            .iter()
            .take(PLAN_MAX_STEPS)
            .enumerate()
            .filter_map(|(i, step)| {
                let number = step
                    .get("number")
                    .and_then(Value::as_u64)
                    .unwrap_or(i as u64 + 1) as u32;
                let description = step.get("description")?.as_str()?.to_string();
                Some(PlanStep {
                    id: format!("{plan_id}-step-{number}"),
                    number,
                    description,
                    status: PlanStepStatus::Pending,
                })
            })
            .collect();

        if steps.is_empty() {
            continue;
        }
        return Some(Plan {
            id: plan_id,
            description,
            steps,
        });
    }

    None
}
