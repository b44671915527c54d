use inkwell_common::content::{extract, FieldSelection, SelectionKind};
use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn interesting_char() -> impl Strategy<Value = char> {
    prop_oneof![
        (b'a'..=b'z').prop_map(char::from),
        (b'A'..=b'Z').prop_map(char::from),
        (b'0'..=b'9').prop_map(char::from),
        Just(' '),
        Just('\n'),
        Just('\t'),
        Just('"'),
        Just('\\'),
        Just('#'),
        Just('*'),
        Just('é'),
        Just('中'),
        Just('🙂'),
    ]
}

fn markdown_string(max_len: usize) -> impl Strategy<Value = String> {
    vec(interesting_char(), 0..max_len).prop_map(|chars| chars.into_iter().collect())
}

fn field_name() -> impl Strategy<Value = String> {
    "[a-z_]{1,10}".prop_filter("reserved for the editable field", |name| name != "content")
}

/// Integers past `u64` and decimals past `f64` precision, kept as written.
fn wide_number() -> impl Strategy<Value = Value> {
    prop_oneof![
        "-?[1-9][0-9]{20,40}",
        "-?[0-9]\\.[0-9]{18,30}",
    ]
    .prop_map(|literal| serde_json::from_str(&literal).expect("literal is a json number"))
}

fn pass_through_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::from),
        wide_number(),
        any::<bool>().prop_map(Value::from),
        Just(Value::Null),
        markdown_string(40).prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            vec((field_name(), inner), 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

/// A structured document with a `content` field at a random position.
fn structured_document() -> impl Strategy<Value = (Map<String, Value>, String)> {
    (vec((field_name(), pass_through_value()), 0..6), markdown_string(200), any::<usize>())
        .prop_map(|(fields, content, position)| {
            let mut fields: Vec<(String, Value)> = fields;
            let at = position % (fields.len() + 1);
            fields.insert(at, ("content".to_string(), Value::String(content.clone())));
            (fields.into_iter().collect(), content)
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn unchanged_payload_round_trips_byte_for_byte((document, content) in structured_document()) {
        let raw = serde_json::to_vec_pretty(&Value::Object(document)).unwrap();
        let extraction = extract(&raw, "docs/page.json");

        prop_assert_eq!(extraction.field_key(), Some("content"));
        prop_assert_eq!(&extraction.text, &content);
        prop_assert_eq!(extraction.render(&extraction.text).unwrap(), raw);
    }

    #[test]
    fn edits_touch_only_the_selected_field(
        (document, _content) in structured_document(),
        edited in markdown_string(200),
    ) {
        let raw = serde_json::to_vec_pretty(&Value::Object(document.clone())).unwrap();
        let extraction = extract(&raw, "docs/page.json");
        let saved = extraction.render(&edited).unwrap();

        let reparsed: Map<String, Value> = serde_json::from_slice(&saved).unwrap();
        prop_assert_eq!(
            reparsed.keys().collect::<Vec<_>>(),
            document.keys().collect::<Vec<_>>()
        );
        for (key, value) in &document {
            if key == "content" {
                prop_assert_eq!(&reparsed[key], &json!(edited));
            } else {
                prop_assert_eq!(&reparsed[key], value);
            }
        }
    }

    #[test]
    fn plain_text_paths_never_touch_content(text in markdown_string(300)) {
        let extraction = extract(text.as_bytes(), "notes/page.md");
        prop_assert_eq!(&extraction.selection, &FieldSelection::PlainText);
        prop_assert_eq!(&extraction.text, &text);
        prop_assert_eq!(extraction.render(&text).unwrap(), text.as_bytes().to_vec());
    }

    #[test]
    fn arbitrary_bytes_never_fail_extraction(raw in vec(any::<u8>(), 0..256)) {
        let extraction = extract(&raw, "docs/blob.json");
        prop_assert!(matches!(
            extraction.selection_kind(),
            SelectionKind::Field | SelectionKind::NoFieldDetected | SelectionKind::MalformedEnvelope
        ));
    }
}

#[test]
fn scenario_documents_select_expected_fields() {
    let with_content = extract(br#"{"title":"X","content":"hello"}"#, "docs/a.json");
    assert_eq!(with_content.field_key(), Some("content"));
    assert_eq!(with_content.text, "hello");

    let long = "This paragraph is comfortably longer than fifty characters in total.";
    let raw = serde_json::to_vec(&json!({ "title": "X", "body_copy": long })).unwrap();
    let with_long_text = extract(&raw, "docs/a.json");
    assert_eq!(with_long_text.field_key(), Some("body_copy"));
    assert_eq!(with_long_text.text, long);
}
