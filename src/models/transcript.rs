//! Managed conversation transcript and its structural repair rule.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable conversation history for one spawn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Transcript {
    /// Conversation reference, or the spawn id until the agent reveals one.
    pub id: String,
    /// Time of the last commit.
    pub timestamp: DateTime<Utc>,
    /// Instructions in effect when the transcript was last written.
    pub instructions: String,
    /// Ordered conversation items.
    pub items: Vec<TranscriptItem>,
}

impl Transcript {
    /// Start an empty transcript.
    #[must_use]
    pub fn new(id: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            instructions: instructions.into(),
            items: Vec::new(),
        }
    }

    /// Apply [`repair_items`] in place and return how many items were dropped.
    pub fn repair(&mut self) -> usize {
        let before = self.items.len();
        self.items = repair_items(std::mem::take(&mut self.items));
        before - self.items.len()
    }
}

/// One typed conversation item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptItem {
    /// User prompt or agent answer.
    Message {
        /// `user` or `assistant`.
        role: String,
        /// Message body.
        text: String,
    },
    /// Agent reasoning summary.
    Reasoning {
        /// Reasoning text.
        text: String,
    },
    /// Tool invocation issued by the agent.
    ToolCall {
        /// Correlation id linking the call to its result.
        #[serde(default)]
        call_id: Option<String>,
        /// Tool kind (`shell`, `web_search`, ...).
        name: String,
        /// Tool-specific arguments.
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// Result of a previous tool invocation.
    ToolResult {
        /// Correlation id of the originating call.
        call_id: String,
        /// Captured output.
        #[serde(default)]
        output: String,
        /// Exit status for shell-like tools.
        #[serde(default)]
        exit_code: Option<i32>,
    },
    /// Any item type this build does not understand.
    #[serde(other)]
    Unknown,
}

/// Drop items that break the call/result pairing or have an unknown type.
///
/// After repair, every tool call carrying a `call_id` is followed by exactly
/// one tool result with that id before the id is called again, and every tool
/// result closes such a call. An id may be reused once its call is closed,
/// since the agent restarts its item numbering on every turn. Calls without a
/// `call_id` are kept as-is. Repairing an already repaired list returns it
/// unchanged.
#[must_use]
pub fn repair_items(items: Vec<TranscriptItem>) -> Vec<TranscriptItem> {
    // call_id -> position in `kept` of the call still waiting for its result
    let mut open: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(items.len());

    for item in items {
        match item {
            TranscriptItem::Unknown => {}
            TranscriptItem::ToolCall {
                call_id: Some(ref id),
                ..
            } => {
                if let Entry::Vacant(slot) = open.entry(id.clone()) {
                    slot.insert(kept.len());
                    kept.push(item);
                }
            }
            TranscriptItem::ToolResult { ref call_id, .. } => {
                if open.remove(call_id).is_some() {
                    kept.push(item);
                }
            }
            other => kept.push(other),
        }
    }

    if open.is_empty() {
        return kept;
    }
    let orphans: HashSet<usize> = open.into_values().collect();
    kept.into_iter()
        .enumerate()
        .filter(|(index, _)| !orphans.contains(index))
        .map(|(_, item)| item)
        .collect()
}
