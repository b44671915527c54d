// WebSocket frame types for the inkwell-session.v1 protocol.
//
// One connection owns one document session. Frames are JSON objects tagged
// by `type`.

use serde::{Deserialize, Serialize};

use crate::content::SelectionKind;
use crate::protocol::http::VersionContent;
use crate::types::VersionInfo;

pub const SESSION_PROTOCOL: &str = "inkwell-session.v1";

/// Whether the session currently holds the document lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Editing,
    ReadOnly,
}

impl SessionMode {
    pub fn is_editing(self) -> bool {
        matches!(self, Self::Editing)
    }
}

/// Why a session switched mode after it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeReason {
    /// Another identity holds a fresh lease.
    Conflict,
    /// Our lease expired and another identity took it over.
    LockLost,
    /// Our lease vanished (expired and swept, or released elsewhere).
    LeaseMissing,
    /// The lease was obtained again.
    Reacquired,
}

/// Server -> Client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session is ready; carries the editable payload of the baseline.
    Opened {
        mode: SessionMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        holder: Option<String>,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field_key: Option<String>,
        selection: SelectionKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<VersionInfo>,
    },

    ModeChanged {
        mode: SessionMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        holder: Option<String>,
        reason: ModeReason,
    },

    Saved {
        version: VersionInfo,
    },

    /// Both bodies for client-side diffing.
    Comparison {
        from: VersionContent,
        to: VersionContent,
    },

    Closed,

    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

/// Client -> Server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Save {
        content: String,
    },

    /// Selectors are a version id, `previous` or `latest`.
    Compare {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },

    Reacquire,

    Close,
}
