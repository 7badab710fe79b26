//! Extraction of structured answers from redundantly-encoded oracle replies.
//!
//! Prompts ask the oracle to state each answer twice: once as a compact tagged
//! line (`<|UPDATE_NODE|>:id1,id2` or `WORLD=YES; CHARACTER=NO`) and once as a
//! JSON fragment. The functions here are small pure strategies over strings;
//! callers pick an order, union what they need and fall back to heuristics
//! when nothing survives.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

/// A JSON object pulled out of oracle text.
pub type JsonObject = Map<String, Value>;

lazy_static! {
    static ref ACTION_TAG: Regex =
        Regex::new(r"<\|([A-Z_]+)\|>\s*[:：]?\s*([^\n]*)").expect("action tag regex");
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*?\}").expect("json object regex");
    static ref ID_SEPARATORS: Regex = Regex::new(r"[,，、;；|\s]+").expect("id separator regex");
    static ref KEY_PAIR: Regex =
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*[:=：＝]\s*").expect("key pair regex");
}

/// Tokens meaning "nothing" in an identifier list.
const EMPTY_MARKERS: &[&str] = &["NONE", "NULL", "NO", "N/A", "无", "无相关信息"];

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

// ============================================================================
// Strategy 1: tagged lines
// ============================================================================

/// A `<|TAG|>:value` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedLine {
    pub tag: String,
    pub value: String,
}

/// Every `<|TAG|>:value` occurrence whose tag is in `accepted`, in text order.
pub fn tagged_lines(text: &str, accepted: &[&str]) -> Vec<TaggedLine> {
    ACTION_TAG
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1)?.as_str();
            if !accepted.iter().any(|a| a.eq_ignore_ascii_case(tag)) {
                return None;
            }
            Some(TaggedLine {
                tag: tag.to_ascii_uppercase(),
                value: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
            })
        })
        .collect()
}

/// Value of the first `KEY=value` (or `KEY: value`) pair, up to `;` or newline.
pub fn tagged_value(text: &str, key: &str) -> Option<String> {
    capture_after_key(text, key, &['\n', ';', '；'])
}

/// Rest of the line after the first `KEY=` (or `KEY:`), including any `;`.
pub fn tagged_line_value(text: &str, key: &str) -> Option<String> {
    capture_after_key(text, key, &['\n'])
}

fn capture_after_key(text: &str, key: &str, stops: &[char]) -> Option<String> {
    KEY_PAIR.captures_iter(text).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(key) {
            return None;
        }
        let rest = &text[caps.get(0)?.end()..];
        let value = rest.split(stops).next().unwrap_or_default().trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Boolean stated in a `KEY=YES/NO` pair.
pub fn tagged_bool(text: &str, key: &str) -> Option<bool> {
    let value = tagged_value(text, key)?;
    let token = value.split_whitespace().next()?;
    parse_bool_token(token.trim_matches(|c: char| !c.is_alphanumeric()))
}

// ============================================================================
// Strategy 2: outermost JSON array
// ============================================================================

/// Objects from the outermost `[...]` substring.
///
/// A malformed array does not fail the whole parse: well-formed objects inside
/// it are still recovered and anything else is discarded.
pub fn json_array_objects(text: &str) -> Vec<JsonObject> {
    let text = strip_code_fence(text);
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }
    let slice = &text[start..=end];

    match serde_json::from_str::<Vec<Value>>(slice) {
        Ok(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Err(_) => json_objects(slice),
    }
}

// ============================================================================
// Strategy 3: every JSON object
// ============================================================================

/// Every well-formed `{...}` object, matched non-greedily across newlines.
pub fn json_objects(text: &str) -> Vec<JsonObject> {
    JSON_OBJECT
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter_map(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// First object that carries `key` with a value `coerce_bool` accepts.
pub fn json_bool(text: &str, key: &str) -> Option<(bool, String)> {
    json_objects(text).into_iter().find_map(|obj| {
        let value = coerce_bool(obj.get(key)?)?;
        Some((value, json_str(&obj, "reason")))
    })
}

/// A string field, trimmed; numbers are stringified; anything else is empty.
pub fn json_str(obj: &JsonObject, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// The first non-empty string among several alias keys.
pub fn json_str_any(obj: &JsonObject, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| json_str(obj, k))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

// ============================================================================
// Coercions
// ============================================================================

/// `true/yes/y/1` and `false/no/n/0`, case-insensitive.
pub fn parse_bool_token(token: &str) -> Option<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => match token.trim() {
            "是" => Some(true),
            "否" => Some(false),
            _ => None,
        },
    }
}

/// Booleans, integers (non-zero is true) and boolean-ish strings.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => parse_bool_token(s),
        _ => None,
    }
}

/// First standalone boolean token in free text.
pub fn first_bool_token(text: &str) -> Option<bool> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .find_map(parse_bool_token)
}

/// Split a loose identifier list (`a, b；c | d`) into clean tokens.
pub fn split_identifiers(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || is_empty_marker(raw) {
        return Vec::new();
    }
    ID_SEPARATORS
        .split(raw)
        .map(|t| {
            t.trim_matches(|c: char| matches!(c, '"' | '\'' | '[' | ']' | '(' | ')' | '`'))
                .to_string()
        })
        .filter(|t| !t.is_empty() && !is_empty_marker(t))
        .collect()
}

/// Identifiers from a JSON array of strings or a loose string list.
pub fn coerce_id_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty() && !is_empty_marker(s))
            .collect(),
        Some(Value::String(s)) => split_identifiers(s),
        _ => Vec::new(),
    }
}

fn is_empty_marker(token: &str) -> bool {
    EMPTY_MARKERS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(token.trim()))
}

/// Order-preserving deduplication.
pub fn dedupe<T: PartialEq + Clone>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_lines_multiple() {
        let text = "<|UPDATE_NODE|>:micro.r1, micro.r1.p1\n<|ADD_NODE|>：micro.r2\nnoise";
        let lines = tagged_lines(text, &["ADD_NODE", "UPDATE_NODE"]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].tag, "UPDATE_NODE");
        assert_eq!(lines[0].value, "micro.r1, micro.r1.p1");
        assert_eq!(lines[1].tag, "ADD_NODE");
        assert_eq!(lines[1].value, "micro.r2");
    }

    #[test]
    fn test_tagged_lines_ignores_unlisted_tags() {
        let lines = tagged_lines("<|KEY|>:North\n<|REMOVE_NODE|>:x", &["REMOVE_NODE"]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].value, "x");
    }

    #[test]
    fn test_tagged_value_stops_at_semicolon() {
        let text = "WORLD=YES; CHARACTER=no";
        assert_eq!(tagged_value(text, "WORLD").as_deref(), Some("YES"));
        assert_eq!(tagged_bool(text, "character"), Some(false));
    }

    #[test]
    fn test_tagged_value_not_inside_longer_word() {
        assert_eq!(tagged_value("UPDATE_WORLD=yes", "WORLD"), None);
        assert_eq!(tagged_value(r#"{"world": ["a"]}"#, "WORLD"), None);
    }

    #[test]
    fn test_tagged_value_skips_other_keys_and_empty_values() {
        let text = "reason: none\nVALID =\n; VALID＝ yes";
        assert_eq!(tagged_value(text, "valid").as_deref(), Some("yes"));
        assert_eq!(tagged_bool("continue：NO", "CONTINUE"), Some(false));
        assert_eq!(tagged_value("MERGE=", "MERGE"), None);
    }

    #[test]
    fn test_tagged_line_value_keeps_semicolons() {
        let text = "MERGE=micro.r1.p1; micro.r1.p2";
        assert_eq!(
            tagged_line_value(text, "MERGE").as_deref(),
            Some("micro.r1.p1; micro.r1.p2")
        );
    }

    #[test]
    fn test_json_array_discards_non_objects() {
        let text = r#"Here: [{"action":"UPDATE_NODE","index":"a"}, 3, "x", {"action":"ADD_NODE","index":"b"}] done"#;
        let objs = json_array_objects(text);
        assert_eq!(objs.len(), 2);
        assert_eq!(json_str(&objs[1], "index"), "b");
    }

    #[test]
    fn test_json_array_salvages_objects_from_malformed_array() {
        let text = r#"[{"action":"UPDATE_NODE","index":"a"}, {"action": broken}, {"action":"ADD_NODE","index":"b"},]"#;
        let objs = json_array_objects(text);
        assert_eq!(objs.len(), 2);
        assert_eq!(json_str(&objs[0], "index"), "a");
        assert_eq!(json_str(&objs[1], "index"), "b");
    }

    #[test]
    fn test_json_objects_accumulates_all() {
        let text = "first {\"valid\": \"yes\"}\nthen {oops}\n{\"valid\": false,\n \"reason\": \"missing p2\"}";
        let objs = json_objects(text);
        assert_eq!(objs.len(), 2);
        assert_eq!(json_bool(text, "valid"), Some((true, String::new())));
    }

    #[test]
    fn test_code_fence_stripped() {
        let text = "```json\n[{\"a\":1}]\n```";
        assert_eq!(strip_code_fence(text), "[{\"a\":1}]");
        assert_eq!(json_array_objects(text).len(), 1);
    }

    #[test]
    fn test_coerce_bool_variants() {
        assert_eq!(coerce_bool(&json!(true)), Some(true));
        assert_eq!(coerce_bool(&json!(0)), Some(false));
        assert_eq!(coerce_bool(&json!(2)), Some(true));
        assert_eq!(coerce_bool(&json!("Y")), Some(true));
        assert_eq!(coerce_bool(&json!("No")), Some(false));
        assert_eq!(coerce_bool(&json!("maybe")), None);
        assert_eq!(coerce_bool(&json!(null)), None);
    }

    #[test]
    fn test_first_bool_token() {
        assert_eq!(first_bool_token("I think: yes, propagate"), Some(true));
        assert_eq!(first_bool_token("nothing here"), None);
    }

    #[test]
    fn test_split_identifiers() {
        assert_eq!(
            split_identifiers("micro.r1, 'c2'；c3 | [c4]"),
            vec!["micro.r1", "c2", "c3", "c4"]
        );
        assert!(split_identifiers("NONE").is_empty());
        assert!(split_identifiers("  ").is_empty());
    }

    #[test]
    fn test_coerce_id_list() {
        assert_eq!(coerce_id_list(Some(&json!(["c1", " ", "c2"]))), vec!["c1", "c2"]);
        assert_eq!(coerce_id_list(Some(&json!("c1,c3"))), vec!["c1", "c3"]);
        assert!(coerce_id_list(Some(&json!(12.5))).is_empty());
        assert!(coerce_id_list(None).is_empty());
    }

    #[test]
    fn test_dedupe_preserves_order() {
        assert_eq!(dedupe(vec!["b", "a", "b", "c", "a"]), vec!["b", "a", "c"]);
    }
}
