//! Outbound segmentation: chunk bounds, reconstruction, decorations.

use proptest::prelude::*;
use spawn_relay::outbound::segmenter::{segment, split_chars, SegmentPolicy};

/// Worst case added by balancing: one backtick plus `\n```.
const BALANCE_OVERHEAD: usize = 5;

fn chars(s: &str) -> usize {
    s.chars().count()
}

proptest! {
    #[test]
    fn chunks_respect_the_limit(text in "[a-z `\\n\u{e9}\u{1f600}]{0,400}", limit in 1_usize..80) {
        for chunk in segment(&text, &SegmentPolicy::with_limit(limit)) {
            prop_assert!(chars(&chunk) <= limit + BALANCE_OVERHEAD);
        }
    }

    #[test]
    fn chunks_start_with_their_source_piece(text in "[a-z `\\n]{0,400}", limit in 1_usize..80) {
        let pieces = split_chars(&text, limit);
        prop_assert_eq!(pieces.concat(), text.clone());

        let chunks = segment(&text, &SegmentPolicy::with_limit(limit));
        prop_assert_eq!(chunks.len(), pieces.len());
        for (chunk, piece) in chunks.iter().zip(&pieces) {
            prop_assert!(chunk.starts_with(piece));
        }
    }
}

#[test]
fn lines_left_annotation_on_non_final_chunks() {
    let policy = SegmentPolicy {
        limit: 4,
        annotate_lines_left: true,
        bulk_as_code_block: false,
    };
    let chunks = segment("ab\ncd\nef", &policy);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0], "ab\nc\n\n... (2 lines left)");
    assert_eq!(chunks[1], "d\nef");
}

#[test]
fn bulk_chunks_are_fenced_after_the_first() {
    let policy = SegmentPolicy {
        limit: 3,
        annotate_lines_left: false,
        bulk_as_code_block: true,
    };
    assert_eq!(segment("abcdef", &policy), vec!["abc", "```\ndef\n```"]);
}

#[test]
fn open_code_is_closed_in_each_chunk() {
    let chunks = segment("say `hi` and `bye", &SegmentPolicy::with_limit(100));
    assert_eq!(chunks, vec!["say `hi` and `bye`"]);

    let chunks = segment("```\nfn main() {}\n", &SegmentPolicy::with_limit(8));
    assert_eq!(chunks[0], "```\nfn m\n```");
}

#[test]
fn splitting_never_breaks_a_char() {
    let text = "\u{1f600}\u{1f600}\u{1f600}";
    assert_eq!(split_chars(text, 2), vec!["\u{1f600}\u{1f600}", "\u{1f600}"]);
}
