use chrono::{TimeZone, Utc};
use inkwell_common::content::SelectionKind;
use inkwell_common::protocol::http::VersionContent;
use inkwell_common::protocol::ws::{
    ClientMessage, ModeReason, ServerMessage, SessionMode, SESSION_PROTOCOL,
};
use inkwell_common::types::VersionInfo;
use serde_json::json;

fn version(id: &str, is_latest: bool) -> VersionInfo {
    VersionInfo {
        version_id: id.to_string(),
        created_at: Utc.timestamp_opt(1_760_000_000, 0).single().expect("valid timestamp"),
        size: 5,
        is_latest,
        is_delete_marker: false,
    }
}

#[test]
fn session_protocol_name_is_versioned() {
    assert_eq!(SESSION_PROTOCOL, "inkwell-session.v1");
}

#[test]
fn server_frame_shapes_match_contract() {
    let samples = [
        (
            ServerMessage::Opened {
                mode: SessionMode::Editing,
                holder: Some("alice".into()),
                content: "hello".into(),
                field_key: Some("content".into()),
                selection: SelectionKind::Field,
                version: Some(version("v-1", true)),
            },
            "opened",
            &["type", "mode", "holder", "content", "field_key", "selection", "version"][..],
        ),
        (
            ServerMessage::ModeChanged {
                mode: SessionMode::ReadOnly,
                holder: Some("bob".into()),
                reason: ModeReason::Conflict,
            },
            "mode_changed",
            &["type", "mode", "holder", "reason"][..],
        ),
        (ServerMessage::Saved { version: version("v-2", true) }, "saved", &["type", "version"][..]),
        (
            ServerMessage::Comparison {
                from: VersionContent { version: version("v-1", false), content: "a".into() },
                to: VersionContent { version: version("v-2", true), content: "b".into() },
            },
            "comparison",
            &["type", "from", "to"][..],
        ),
        (ServerMessage::Closed, "closed", &["type"][..]),
        (
            ServerMessage::Error {
                code: "LOCK_CONFLICT".into(),
                message: "document is locked by alice".into(),
                retryable: false,
            },
            "error",
            &["type", "code", "message", "retryable"][..],
        ),
    ];

    for (message, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(message).expect("server frame should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn client_frames_parse_from_contract_json() {
    let samples = [
        (json!({ "type": "save", "content": "# draft" }), ClientMessage::Save { content: "# draft".into() }),
        (json!({ "type": "compare" }), ClientMessage::Compare { from: None, to: None }),
        (
            json!({ "type": "compare", "from": "previous", "to": "v-9" }),
            ClientMessage::Compare { from: Some("previous".into()), to: Some("v-9".into()) },
        ),
        (json!({ "type": "reacquire" }), ClientMessage::Reacquire),
        (json!({ "type": "close" }), ClientMessage::Close),
    ];

    for (raw, expected) in samples {
        let parsed: ClientMessage =
            serde_json::from_value(raw.clone()).unwrap_or_else(|error| panic!("{raw}: {error}"));
        assert_eq!(parsed, expected);
    }
}

#[test]
fn mode_reasons_are_snake_case() {
    let reasons = [
        (ModeReason::Conflict, "conflict"),
        (ModeReason::LockLost, "lock_lost"),
        (ModeReason::LeaseMissing, "lease_missing"),
        (ModeReason::Reacquired, "reacquired"),
    ];
    for (reason, expected) in reasons {
        assert_eq!(serde_json::to_value(reason).expect("reason serializes"), json!(expected));
    }
}
