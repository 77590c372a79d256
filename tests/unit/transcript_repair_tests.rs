//! Transcript repair: call/result pairing and idempotence.

use std::collections::HashSet;

use proptest::prelude::*;
use spawn_relay::models::transcript::{repair_items, Transcript, TranscriptItem};

fn item_strategy() -> impl Strategy<Value = TranscriptItem> {
    let id = prop::sample::select(vec!["a", "b", "c", "d"]);
    prop_oneof![
        id.clone().prop_map(|id| TranscriptItem::ToolCall {
            call_id: Some(id.into()),
            name: "shell".into(),
            arguments: serde_json::json!({"command": "ls"}),
        }),
        id.prop_map(|id| TranscriptItem::ToolResult {
            call_id: id.into(),
            output: "out".into(),
            exit_code: Some(0),
        }),
        Just(TranscriptItem::ToolCall {
            call_id: None,
            name: "web_search".into(),
            arguments: serde_json::Value::Null,
        }),
        "[a-z]{1,8}".prop_map(|text| TranscriptItem::Message {
            role: "assistant".into(),
            text,
        }),
        Just(TranscriptItem::Unknown),
    ]
}

proptest! {
    #[test]
    fn repaired_items_pair_exactly(items in prop::collection::vec(item_strategy(), 0..40)) {
        let repaired = repair_items(items);
        let mut open: HashSet<String> = HashSet::new();
        for item in &repaired {
            match item {
                TranscriptItem::ToolCall { call_id: Some(id), .. } => {
                    prop_assert!(open.insert(id.clone()), "second call while open");
                }
                TranscriptItem::ToolResult { call_id, .. } => {
                    prop_assert!(open.remove(call_id), "result without open call");
                }
                TranscriptItem::Unknown => prop_assert!(false, "unknown item kept"),
                _ => {}
            }
        }
        prop_assert!(open.is_empty(), "call left without result");
    }

    #[test]
    fn repair_is_idempotent(items in prop::collection::vec(item_strategy(), 0..40)) {
        let once = repair_items(items);
        let twice = repair_items(once.clone());
        prop_assert_eq!(once, twice);
    }
}

#[test]
fn transcript_repair_reports_dropped_count() {
    let mut transcript = Transcript::new("thread", "be nice");
    transcript.items = vec![
        TranscriptItem::ToolCall {
            call_id: Some("x".into()),
            name: "shell".into(),
            arguments: serde_json::Value::Null,
        },
        TranscriptItem::Reasoning { text: "hm".into() },
        TranscriptItem::Unknown,
    ];
    assert_eq!(transcript.repair(), 2);
    assert_eq!(
        transcript.items,
        vec![TranscriptItem::Reasoning { text: "hm".into() }]
    );
}
