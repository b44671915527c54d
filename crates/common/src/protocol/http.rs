// Request and response bodies of the /v1 HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::SelectionKind;
use crate::types::{DocumentEntry, VersionInfo};

/// Extensions listed when a listing request does not name any.
pub const DEFAULT_LIST_EXTENSIONS: [&str; 4] = [".md", ".markdown", ".txt", ".json"];

// ── Documents ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDocumentsQuery {
    pub prefix: Option<String>,
    pub search: Option<String>,
    /// Comma separated, e.g. `.md,.json`.
    pub extensions: Option<String>,
    /// `false` folds deeper documents into one entry per subdirectory.
    /// Defaults to `true`; a search always spans subdirectories.
    pub recursive: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketsEnvelope {
    pub buckets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentsEnvelope {
    pub documents: Vec<DocumentEntry>,
    pub total: usize,
}

/// Latest version of a document as an editable payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentPayload {
    pub bucket: String,
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_key: Option<String>,
    pub selection: SelectionKind,
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveDocumentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveDocumentResponse {
    pub version: VersionInfo,
}

// ── History ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionsEnvelope {
    pub versions: Vec<VersionInfo>,
    pub total: usize,
}

/// One historical snapshot with its body as text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionContent {
    #[serde(flatten)]
    pub version: VersionInfo,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompareQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComparisonEnvelope {
    pub from: VersionContent,
    pub to: VersionContent,
}

// ── Locks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockView {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// How an acquire or heartbeat obtained the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseGrant {
    /// The key was unlocked.
    Acquired,
    /// The caller already held it; expiry was pushed out.
    Renewed,
    /// An expired lease of another identity was superseded.
    TakenOver,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockGrantEnvelope {
    pub lock: LockView,
    pub grant: LeaseGrant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockStatusEnvelope {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseEnvelope {
    pub released: bool,
}
