// Mapping between stored document bytes and the text an editor works on.
//
// Plain-text documents are edited as-is. Structured (JSON) documents expose
// one detected string field; every other field rides along untouched and is
// put back on save.

pub mod detect;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::path::file_name;

pub use detect::{detect_field, DetectedField, MatchRule, FIELD_PRIORITY, LONG_TEXT_THRESHOLD};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("cannot reinject edited text: {0}")]
    InvalidState(&'static str),

    #[error("failed to serialize structured document")]
    Serialize(#[from] serde_json::Error),
}

/// How a document's bytes are interpreted, decided from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PlainText,
    Structured,
}

impl DocumentKind {
    pub fn from_path(path_hint: &str) -> Self {
        match file_name(path_hint).rsplit_once('.') {
            Some((_, extension)) if extension.eq_ignore_ascii_case("json") => Self::Structured,
            _ => Self::PlainText,
        }
    }
}

/// Outcome of field detection. Every degraded outcome is explicit so callers
/// can warn that the whole document is being edited as opaque text.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSelection {
    /// Not a structured path; the raw content is the payload.
    PlainText,
    /// A field was selected; edits are reinjected into `envelope` on save.
    Field { key: String, matched_by: MatchRule, envelope: Map<String, Value> },
    /// Parsed fine but no suitable field; the whole document is the payload.
    NoFieldDetected,
    /// Parsing failed; degraded to plain text.
    MalformedEnvelope { reason: String },
}

/// Wire-friendly tag for [`FieldSelection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    PlainText,
    Field,
    NoFieldDetected,
    MalformedEnvelope,
}

/// The editable payload of a document plus what it takes to save it back.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub selection: FieldSelection,
}

impl Extraction {
    pub fn field_key(&self) -> Option<&str> {
        match &self.selection {
            FieldSelection::Field { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn envelope(&self) -> Option<&Map<String, Value>> {
        match &self.selection {
            FieldSelection::Field { envelope, .. } => Some(envelope),
            _ => None,
        }
    }

    pub fn selection_kind(&self) -> SelectionKind {
        match self.selection {
            FieldSelection::PlainText => SelectionKind::PlainText,
            FieldSelection::Field { .. } => SelectionKind::Field,
            FieldSelection::NoFieldDetected => SelectionKind::NoFieldDetected,
            FieldSelection::MalformedEnvelope { .. } => SelectionKind::MalformedEnvelope,
        }
    }

    /// Turn edited text back into storable bytes: reinjected into the envelope
    /// when a field was selected, the text itself otherwise.
    pub fn render(&self, edited_text: &str) -> Result<Vec<u8>, ContentError> {
        match &self.selection {
            FieldSelection::Field { .. } => {
                reinject(self.envelope(), self.field_key(), edited_text)
            }
            _ => Ok(edited_text.as_bytes().to_vec()),
        }
    }
}

/// Extract the editable payload from `raw`, using `path_hint` to decide
/// whether the bytes are a structured document.
///
/// Never fails: anything that cannot be handled as a structured document is
/// surfaced as plain text with the reason recorded in the selection.
pub fn extract(raw: &[u8], path_hint: &str) -> Extraction {
    let raw_text = || String::from_utf8_lossy(raw).into_owned();

    if DocumentKind::from_path(path_hint) == DocumentKind::PlainText {
        return Extraction { text: raw_text(), selection: FieldSelection::PlainText };
    }

    let envelope = match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Extraction {
                text: raw_text(),
                selection: FieldSelection::MalformedEnvelope {
                    reason: format!("top-level value is {}, not an object", json_type(&other)),
                },
            };
        }
        Err(error) => {
            return Extraction {
                text: raw_text(),
                selection: FieldSelection::MalformedEnvelope { reason: error.to_string() },
            };
        }
    };

    match detect_field(&envelope) {
        Some(DetectedField { key, text, matched_by }) => {
            Extraction { text, selection: FieldSelection::Field { key, matched_by, envelope } }
        }
        None => Extraction { text: raw_text(), selection: FieldSelection::NoFieldDetected },
    }
}

/// Replace `field_key` in `envelope` with `edited_text` and serialize with
/// two-space indentation. Key order and every other value are kept.
pub fn reinject(
    envelope: Option<&Map<String, Value>>,
    field_key: Option<&str>,
    edited_text: &str,
) -> Result<Vec<u8>, ContentError> {
    let envelope = envelope.ok_or(ContentError::InvalidState("no structured envelope"))?;
    let field_key = field_key.ok_or(ContentError::InvalidState("no field key"))?;

    let mut document = envelope.clone();
    let slot = document
        .get_mut(field_key)
        .ok_or(ContentError::InvalidState("field key is not present in the envelope"))?;
    *slot = Value::String(edited_text.to_string());

    Ok(serde_json::to_vec_pretty(&Value::Object(document))?)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
