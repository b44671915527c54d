// Editable-field detection inside a structured (JSON object) document.
//
// Two passes, first hit wins:
// 1. well-known field names in priority order
// 2. the first string field (declaration order) longer than the threshold

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Candidate field names, highest priority first.
pub const FIELD_PRIORITY: [&str; 5] = ["content", "markdown", "body", "text", "description"];

/// A string field must be strictly longer than this many characters to be
/// picked by the fallback scan.
pub const LONG_TEXT_THRESHOLD: usize = 50;

/// Which rule selected the editable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Priority,
    LongText,
}

/// A field chosen for editing, with its current text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedField {
    pub key: String,
    pub text: String,
    pub matched_by: MatchRule,
}

/// Pick the editable field of `document`, if any.
pub fn detect_field(document: &Map<String, Value>) -> Option<DetectedField> {
    let by_priority = FIELD_PRIORITY.iter().find_map(|name| match document.get(*name) {
        Some(Value::String(text)) => Some(DetectedField {
            key: (*name).to_string(),
            text: text.clone(),
            matched_by: MatchRule::Priority,
        }),
        _ => None,
    });
    if by_priority.is_some() {
        return by_priority;
    }

    document.iter().find_map(|(key, value)| match value {
        Value::String(text) if text.chars().count() > LONG_TEXT_THRESHOLD => Some(DetectedField {
            key: key.clone(),
            text: text.clone(),
            matched_by: MatchRule::LongText,
        }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn priority_order_beats_declaration_order() {
        let doc = object(json!({ "text": "later in priority", "body": "earlier in priority" }));
        let field = detect_field(&doc).expect("field should be detected");
        assert_eq!(field.key, "body");
        assert_eq!(field.text, "earlier in priority");
        assert_eq!(field.matched_by, MatchRule::Priority);
    }

    #[test]
    fn non_string_candidates_are_skipped() {
        let doc = object(json!({ "content": { "blocks": [] }, "markdown": 42, "text": "# Hi" }));
        let field = detect_field(&doc).expect("field should be detected");
        assert_eq!(field.key, "text");
    }

    #[test]
    fn short_priority_field_still_wins_over_long_text() {
        let doc = object(json!({ "summary": "x".repeat(200), "description": "" }));
        let field = detect_field(&doc).expect("field should be detected");
        assert_eq!(field.key, "description");
        assert_eq!(field.matched_by, MatchRule::Priority);
    }

    #[test]
    fn long_text_fallback_uses_declaration_order() {
        let doc = object(json!({
            "title": "short",
            "notes": "n".repeat(60),
            "abstract": "a".repeat(80),
        }));
        let field = detect_field(&doc).expect("field should be detected");
        assert_eq!(field.key, "notes");
        assert_eq!(field.matched_by, MatchRule::LongText);
    }

    #[test]
    fn threshold_is_strictly_greater_and_counts_characters() {
        let exactly = object(json!({ "summary": "s".repeat(LONG_TEXT_THRESHOLD) }));
        assert_eq!(detect_field(&exactly), None);

        // 51 multi-byte characters: more than 50 chars, far more than 50 bytes.
        let over = object(json!({ "summary": "é".repeat(LONG_TEXT_THRESHOLD + 1) }));
        assert_eq!(detect_field(&over).map(|f| f.key), Some("summary".to_string()));

        // 30 characters that are 90 bytes long do not qualify.
        let wide = object(json!({ "summary": "漢".repeat(30) }));
        assert_eq!(detect_field(&wide), None);
    }

    #[test]
    fn nothing_suitable_yields_none() {
        let doc = object(json!({ "title": "X", "count": 3, "tags": ["a", "b"] }));
        assert_eq!(detect_field(&doc), None);
    }
}
