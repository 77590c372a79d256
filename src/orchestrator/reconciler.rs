//! Transcript reconciliation: snapshot before a run, then commit or revert.
//!
//! The agent persists its own conversation log while it runs. On a reverting
//! kill both that log and the managed transcript go back to their pre-run
//! bytes; on completion the managed transcript gets the run's items, repaired.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{info, warn};

use crate::models::session::SessionRecord;
use crate::models::transcript::{Transcript, TranscriptItem};
use crate::persistence::agent_log::AgentLogStore;
use crate::persistence::transcript_store::TranscriptStore;
use crate::relay::event::{AgentEvent, AgentItem};
use crate::Result;

/// Pre-run state needed to undo a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    /// Managed transcript bytes, `None` when absent.
    pub transcript: Option<Vec<u8>>,
    /// Agent session log bytes, `None` when absent.
    pub agent_log: Option<Vec<u8>>,
    /// Conversation reference before the run.
    pub conversation_ref: Option<String>,
}

impl RunSnapshot {
    /// Capture the current transcript and agent log for `record`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transcript` if an existing file cannot be read.
    pub fn capture(
        transcripts: &TranscriptStore,
        agent_logs: &AgentLogStore,
        record: &SessionRecord,
    ) -> Result<Self> {
        Ok(Self {
            transcript: transcripts.snapshot(&record.spawn_id)?,
            agent_log: agent_logs.snapshot(record.conversation_ref.as_deref())?,
            conversation_ref: record.conversation_ref.clone(),
        })
    }
}

/// Put the transcript and agent log back to `snapshot`.
///
/// `current_ref` is the conversation reference the run ended with, which
/// locates the agent log even when the run created it. Returns the
/// conversation reference the spawn must carry afterwards.
///
/// # Errors
///
/// Returns `AppError::Transcript` if the managed transcript cannot be restored.
pub fn revert(
    transcripts: &TranscriptStore,
    agent_logs: &AgentLogStore,
    spawn_id: &str,
    snapshot: &RunSnapshot,
    current_ref: Option<&str>,
) -> Result<Option<String>> {
    transcripts.restore(spawn_id, snapshot.transcript.as_deref())?;

    let log_ref = current_ref.or(snapshot.conversation_ref.as_deref());
    match agent_logs.restore(log_ref, snapshot.agent_log.as_deref()) {
        Ok(true) => info!(spawn_id, ?log_ref, "agent session log reverted"),
        Ok(false) => warn!(spawn_id, ?log_ref, "no agent session log to revert"),
        Err(err) => warn!(spawn_id, %err, "failed to revert agent session log"),
    }

    info!(
        spawn_id,
        had_transcript = snapshot.transcript.is_some(),
        "transcript reverted"
    );
    if snapshot.transcript.is_none() {
        Ok(None)
    } else {
        Ok(snapshot.conversation_ref.clone())
    }
}

/// Append the run's events to the pre-run transcript, repair, and write.
///
/// # Errors
///
/// Returns `AppError::Transcript` if the write fails.
pub fn commit(
    transcripts: &TranscriptStore,
    record: &SessionRecord,
    snapshot: &RunSnapshot,
    instructions: &str,
    events: &[AgentEvent],
) -> Result<Transcript> {
    let id = record
        .conversation_ref
        .clone()
        .unwrap_or_else(|| record.spawn_id.clone());

    let mut transcript = match snapshot.transcript.as_deref().map(TranscriptStore::parse) {
        Some(Ok(previous)) => previous,
        Some(Err(err)) => {
            warn!(spawn_id = %record.spawn_id, %err, "previous transcript unreadable, starting over");
            Transcript::new(id.clone(), instructions)
        }
        None => Transcript::new(id.clone(), instructions),
    };
    transcript.id = id;
    transcript.timestamp = chrono::Utc::now();
    instructions.clone_into(&mut transcript.instructions);
    transcript.items.extend(items_from_events(events));

    let dropped = transcript.repair();
    if dropped > 0 {
        warn!(spawn_id = %record.spawn_id, dropped, "repair dropped transcript items");
    }
    transcripts.commit(&record.spawn_id, &transcript)?;
    info!(
        spawn_id = %record.spawn_id,
        items = transcript.items.len(),
        "transcript committed"
    );
    Ok(transcript)
}

/// Convert relayed events into transcript items, in stream order.
#[must_use]
pub fn items_from_events(events: &[AgentEvent]) -> Vec<TranscriptItem> {
    let mut items = Vec::new();
    let mut called: HashSet<String> = HashSet::new();

    for event in events {
        match event {
            AgentEvent::ItemCompleted(AgentItem::AgentMessage {
                text: Some(text), ..
            }) => items.push(TranscriptItem::Message {
                role: "assistant".into(),
                text: text.clone(),
            }),
            AgentEvent::LegacyText(text) => items.push(TranscriptItem::Message {
                role: "assistant".into(),
                text: text.clone(),
            }),
            AgentEvent::ItemCompleted(AgentItem::Reasoning {
                text: Some(text), ..
            }) => items.push(TranscriptItem::Reasoning { text: text.clone() }),
            AgentEvent::ItemStarted(item) if item.is_tool() => {
                if let Some(id) = item.id() {
                    if !called.insert(id.to_owned()) {
                        continue;
                    }
                }
                items.push(tool_call(item));
            }
            AgentEvent::ItemCompleted(item) if item.is_tool() => {
                let Some(id) = item.id() else {
                    items.push(tool_call(item));
                    continue;
                };
                if called.insert(id.to_owned()) {
                    items.push(tool_call(item));
                }
                items.push(tool_result(id, item));
            }
            _ => {}
        }
    }
    items
}

fn tool_call(item: &AgentItem) -> TranscriptItem {
    let arguments = match item {
        AgentItem::CommandExecution { command, .. } | AgentItem::LocalShellCall { command, .. } => {
            serde_json::json!({ "command": command })
        }
        AgentItem::WebSearch { query, action, .. } => {
            serde_json::json!({ "query": query, "action": action })
        }
        AgentItem::Other(raw) => raw.clone(),
        AgentItem::AgentMessage { .. } | AgentItem::Reasoning { .. } => Value::Null,
    };
    TranscriptItem::ToolCall {
        call_id: item.id().map(str::to_owned),
        name: item.tool_name(),
        arguments,
    }
}

fn tool_result(call_id: &str, item: &AgentItem) -> TranscriptItem {
    let (output, exit_code) = match item {
        AgentItem::CommandExecution {
            aggregated_output,
            exit_code,
            ..
        } => (aggregated_output.clone().unwrap_or_default(), *exit_code),
        AgentItem::Other(raw) => (
            raw.get("output")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            None,
        ),
        _ => (String::new(), None),
    };
    TranscriptItem::ToolResult {
        call_id: call_id.to_owned(),
        output,
        exit_code,
    }
}
