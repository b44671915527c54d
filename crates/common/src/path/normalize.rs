// Document key canonicalization: NFC normalization, traversal rejection,
// 1024 char max for object paths, object-store naming rules for buckets.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum allowed object path length in characters.
const MAX_PATH_CHARS: usize = 1024;
const MIN_BUCKET_CHARS: usize = 3;
const MAX_BUCKET_CHARS: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path exceeds maximum length of {MAX_PATH_CHARS} characters")]
    TooLong,

    #[error("path contains directory traversal component: {0}")]
    Traversal(String),

    #[error("path contains null byte")]
    NullByte,

    #[error("path contains invalid component: {0}")]
    InvalidComponent(String),

    #[error("invalid bucket name `{0}`")]
    InvalidBucket(String),
}

/// Normalize a document path so every editor addresses the same object.
///
/// Rules:
/// - Apply Unicode NFC normalization (decomposed input from macOS clients
///   maps to the same key as composed input)
/// - Convert all separators to `/`
/// - Collapse consecutive `/` into one
/// - Strip leading and trailing `/`
/// - Reject `.` and `..` path components (traversal)
/// - Reject null bytes
/// - Reject empty paths
/// - Enforce max 1024 character limit (after normalization)
pub fn normalize_path(input: &str) -> Result<String, PathError> {
    if input.is_empty() {
        return Err(PathError::Empty);
    }

    if input.contains('\0') {
        return Err(PathError::NullByte);
    }

    let normalized: String = input.nfc().collect();
    let unified = normalized.replace('\\', "/");

    let components: Vec<&str> = unified.split('/').filter(|s| !s.is_empty()).collect();

    if components.is_empty() {
        return Err(PathError::Empty);
    }

    for component in &components {
        if *component == "." || *component == ".." {
            return Err(PathError::Traversal((*component).to_string()));
        }
        if component.trim().is_empty() {
            return Err(PathError::InvalidComponent(
                "(whitespace-only component)".to_string(),
            ));
        }
    }

    let result = components.join("/");

    if result.chars().count() > MAX_PATH_CHARS {
        return Err(PathError::TooLong);
    }

    Ok(result)
}

/// Validate a bucket name against object-store naming rules.
///
/// Buckets are 3-63 characters of lowercase ASCII letters, digits, `.` and
/// `-`, starting and ending with a letter or digit. Surrounding whitespace is
/// trimmed; nothing else is rewritten.
pub fn normalize_bucket(input: &str) -> Result<String, PathError> {
    let bucket = input.trim();
    if bucket.is_empty() {
        return Err(PathError::Empty);
    }

    let len = bucket.len();
    let valid_chars = bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-');
    let valid_edges = bucket
        .bytes()
        .next()
        .zip(bucket.bytes().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if !(MIN_BUCKET_CHARS..=MAX_BUCKET_CHARS).contains(&len)
        || !valid_chars
        || !valid_edges
        || bucket.contains("..")
    {
        return Err(PathError::InvalidBucket(bucket.to_string()));
    }

    Ok(bucket.to_string())
}
