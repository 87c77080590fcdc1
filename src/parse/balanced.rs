//! Brace-balanced object extraction and malformed-JSON repair.
//!
//! Model output interleaves prose with JSON objects, and mid-stream text
//! routinely ends inside an object. The extractor scans character by
//! character from a candidate opening brace, tracking quote state, a
//! pending-escape flag, and brace depth; braces inside string literals do
//! not count. A candidate that never returns to depth zero is *incomplete*
//! — a normal streaming condition — and yields `None` rather than an error.

use serde_json::Value;

/// Returns the substring of `text` starting at byte offset `open` (which
/// must point at a `{`) through the matching closing brace, or `None` if
/// the text ends before the object balances.
pub(crate) fn extract_balanced_object(text: &str, open: usize) -> Option<&str> {
    debug_assert_eq!(text.as_bytes().get(open), Some(&b'{'));

    let mut depth: u32 = 0;
    let mut in_string = false;
    let mut escape_pending = false;

    for (offset, ch) in text[open..].char_indices() {
        if escape_pending {
            escape_pending = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_pending = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..open + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Escapes literal newline, carriage-return, and tab bytes that occur
/// *inside string literals* of `candidate`.
///
/// Models that emit code blocks inside JSON string values often leave the
/// line breaks unescaped, which is invalid JSON. Structure outside strings
/// is left untouched.
pub(crate) fn repair_string_newlines(candidate: &str) -> String {
    let mut out = String::with_capacity(candidate.len() + 16);
    let mut in_string = false;
    let mut escape_pending = false;

    for ch in candidate.chars() {
        if escape_pending {
            escape_pending = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => {
                escape_pending = true;
                out.push(ch);
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }

    out
}

/// Parses `candidate` as a JSON object, retrying once through
/// [`repair_string_newlines`] if the direct parse fails.
///
/// Returns `None` for anything that is not an object even after repair.
pub(crate) fn parse_object_lenient(candidate: &str) -> Option<Value> {
    let parsed = serde_json::from_str::<Value>(candidate)
        .or_else(|_| serde_json::from_str::<Value>(&repair_string_newlines(candidate)))
        .ok()?;
    parsed.is_object().then_some(parsed)
}

/// Iterates over every complete balanced object in `text`, yielding
/// `(start_offset, matched_text)` pairs. Overlapping candidates are not
/// produced: scanning resumes after each matched object.
pub(crate) fn balanced_objects(text: &str) -> Vec<(usize, &str)> {
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find('{') {
        let open = search_from + rel;
        match extract_balanced_object(text, open) {
            Some(object) => {
                found.push((open, object));
                search_from = open + object.len();
            }
            // Incomplete from here to end of text; no later candidate can
            // complete either once an unbalanced open brace is outside a
            // string, but a brace inside prose quotes can — keep scanning
            // from the next character.
            None => search_from = open + 1,
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_simple_object() {
        let text = r#"before {"a": 1} after"#;
        let open = text.find('{').unwrap();
        assert_eq!(extract_balanced_object(text, open), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_extract_nested_object() {
        let text = r#"{"a": {"b": {"c": 3}}}"#;
        assert_eq!(extract_balanced_object(text, 0), Some(text));
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"{"code": "fn main() { println!(\"{}\", 1); }"}"#;
        assert_eq!(extract_balanced_object(text, 0), Some(text));
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let text = r#"{"s": "say \"hi\" {not a brace}"}"#;
        assert_eq!(extract_balanced_object(text, 0), Some(text));
    }

    #[test]
    fn test_incomplete_object_returns_none() {
        let text = r#"{"a": {"b": 1}"#;
        assert_eq!(extract_balanced_object(text, 0), None);
    }

    #[test]
    fn test_incomplete_mid_string_returns_none() {
        let text = r#"{"a": "unterminated"#;
        assert_eq!(extract_balanced_object(text, 0), None);
    }

    #[test]
    fn test_repair_newlines_inside_strings() {
        let broken = "{\"code\": \"line one\nline two\tend\"}";
        let repaired = repair_string_newlines(broken);
        assert_eq!(repaired, "{\"code\": \"line one\\nline two\\tend\"}");
        assert!(serde_json::from_str::<Value>(&repaired).is_ok());
    }

    #[test]
    fn test_repair_leaves_structural_whitespace() {
        let text = "{\n  \"a\": 1\n}";
        assert_eq!(repair_string_newlines(text), text);
    }

    #[test]
    fn test_repair_leaves_existing_escapes() {
        let text = r#"{"code": "already\nescaped"}"#;
        assert_eq!(repair_string_newlines(text), text);
    }

    #[test]
    fn test_parse_object_lenient_direct() {
        let value = parse_object_lenient(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_parse_object_lenient_repairs() {
        let value = parse_object_lenient("{\"code\": \"a\nb\"}").unwrap();
        assert_eq!(value, json!({"code": "a\nb"}));
    }

    #[test]
    fn test_parse_object_lenient_rejects_non_objects() {
        assert!(parse_object_lenient("[1, 2]").is_none());
        assert!(parse_object_lenient("\"string\"").is_none());
    }

    #[test]
    fn test_parse_object_lenient_rejects_garbage() {
        assert!(parse_object_lenient("{definitely not json").is_none());
    }

    #[test]
    fn test_balanced_objects_finds_all() {
        let text = r#"one {"a": 1} two {"b": 2} three"#;
        let found = balanced_objects(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].1, r#"{"a": 1}"#);
        assert_eq!(found[1].1, r#"{"b": 2}"#);
    }

    #[test]
    fn test_balanced_objects_skips_trailing_incomplete() {
        let text = r#"{"done": true} and then {"partial": "#;
        let found = balanced_objects(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, r#"{"done": true}"#);
    }
}
