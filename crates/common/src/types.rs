// Core domain types shared across all Inkwell crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::{normalize_bucket, normalize_path, PathError};

/// Address of exactly one logical document: a bucket plus an object path.
///
/// Both halves are validated and normalized on construction, so two keys
/// compare equal exactly when they address the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocumentKey {
    bucket: String,
    path: String,
}

impl DocumentKey {
    pub fn new(bucket: &str, path: &str) -> Result<Self, PathError> {
        Ok(Self { bucket: normalize_bucket(bucket)?, path: normalize_path(path)? })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

/// Metadata of one immutable document snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Opaque identifier, unique per key.
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    /// Content length in bytes.
    pub size: u64,
    pub is_latest: bool,
    #[serde(default)]
    pub is_delete_marker: bool,
}

/// A document as seen when browsing a bucket: its latest, non-deleted version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// A folded subdirectory of a non-recursive listing; `name` ends in `/`.
    #[serde(default)]
    pub is_dir: bool,
}

impl DocumentEntry {
    pub fn document(name: String, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self { name, size, last_modified, is_dir: false }
    }

    pub fn directory(name: String, last_modified: DateTime<Utc>) -> Self {
        Self { name, size: 0, last_modified, is_dir: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalizes_both_halves() {
        let key = DocumentKey::new(" docs ", "/notes//a.json").expect("key should be valid");
        assert_eq!(key.bucket(), "docs");
        assert_eq!(key.path(), "notes/a.json");
        assert_eq!(key.to_string(), "docs/notes/a.json");
    }

    #[test]
    fn key_rejects_empty_path() {
        assert_eq!(DocumentKey::new("docs", ""), Err(PathError::Empty));
    }

    #[test]
    fn equivalent_spellings_are_the_same_key() {
        let a = DocumentKey::new("docs", "notes\\a.md").unwrap();
        let b = DocumentKey::new("docs", "notes/a.md/").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn version_info_defaults_delete_marker_when_absent() {
        let parsed: VersionInfo = serde_json::from_value(serde_json::json!({
            "version_id": "v1",
            "created_at": "2024-01-01T00:00:00Z",
            "size": 5,
            "is_latest": true,
        }))
        .expect("version info should parse");
        assert!(!parsed.is_delete_marker);
        assert!(parsed.is_latest);
    }
}
