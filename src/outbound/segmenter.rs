//! Splitting of long notifications into self-balanced chat messages.

use crate::config::OutboundConfig;

const FENCE: &str = "```";

/// How [`segment`] cuts and decorates chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPolicy {
    /// Maximum characters taken from the source text per chunk.
    pub limit: usize,
    /// Append `... (N lines left)` to non-final chunks.
    pub annotate_lines_left: bool,
    /// Wrap every chunk after the first in a code fence.
    pub bulk_as_code_block: bool,
}

impl SegmentPolicy {
    /// Plain policy with only a character limit.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            annotate_lines_left: false,
            bulk_as_code_block: false,
        }
    }
}

impl From<&OutboundConfig> for SegmentPolicy {
    fn from(config: &OutboundConfig) -> Self {
        Self {
            limit: config.message_limit,
            annotate_lines_left: config.annotate_lines_left,
            bulk_as_code_block: config.bulk_as_code_block,
        }
    }
}

/// Cut `text` into pieces of at most `limit` characters, on char boundaries.
#[must_use]
pub fn split_chars(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let cut = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(idx, _)| idx);
        let (piece, tail) = rest.split_at(cut);
        pieces.push(piece);
        rest = tail;
    }
    pieces
}

/// Split `text` into deliverable chunks.
///
/// Each chunk is balanced on its own: an odd number of inline backticks gets
/// a closing backtick, and an odd number of triple fences gets a closing
/// fence on its own line.
#[must_use]
pub fn segment(text: &str, policy: &SegmentPolicy) -> Vec<String> {
    let pieces = split_chars(text, policy.limit);
    let last = pieces.len().saturating_sub(1);

    pieces
        .iter()
        .enumerate()
        .map(|(idx, piece)| {
            let mut chunk = close_unterminated_code(piece);
            if policy.annotate_lines_left && idx < last {
                let left: usize = pieces[idx + 1..]
                    .concat()
                    .lines()
                    .count();
                chunk.push_str(&format!("\n\n... ({left} lines left)"));
            }
            if policy.bulk_as_code_block && idx > 0 {
                chunk = format!("{FENCE}\n{chunk}\n{FENCE}");
            }
            chunk
        })
        .collect()
}

/// Close an odd inline backtick, then an odd triple fence.
#[must_use]
pub fn close_unterminated_code(piece: &str) -> String {
    let fences = piece.matches(FENCE).count();
    let inline = piece.replace(FENCE, "").matches('`').count();

    let mut out = piece.to_owned();
    if inline % 2 == 1 {
        out.push('`');
    }
    if fences % 2 == 1 {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(FENCE);
    }
    out
}
