//! Decoding of agent NDJSON records into typed events.
//!
//! | `type`                           | Maps to                          |
//! |----------------------------------|----------------------------------|
//! | `thread.started`                 | [`AgentEvent::ThreadStarted`]    |
//! | `turn.started` / `turn.cancelled`| lifecycle markers                |
//! | `turn.completed`                 | [`AgentEvent::TurnCompleted`]    |
//! | `turn.failed` / `error`          | [`AgentEvent::TurnFailed`] / [`AgentEvent::Error`] |
//! | `item.started` / `item.completed`| item events carrying [`AgentItem`] |
//! | *(legacy `{"msg": …}`)*          | decoded from the nested payload  |
//! | *(anything else)*                | [`AgentEvent::Unknown`]          |

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{AppError, Result};

/// One decoded agent event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The agent opened (or resumed) a conversation.
    ThreadStarted {
        /// Conversation reference used to resume later.
        thread_id: String,
    },
    /// A turn began.
    TurnStarted,
    /// A turn was cancelled.
    TurnCancelled,
    /// A turn finished; `usage` holds token counts when reported.
    TurnCompleted {
        /// Raw usage object.
        usage: Option<Map<String, Value>>,
    },
    /// A turn failed.
    TurnFailed {
        /// Error message, if present.
        message: Option<String>,
    },
    /// Stream-level error.
    Error {
        /// Error message, if present.
        message: Option<String>,
    },
    /// An item started.
    ItemStarted(AgentItem),
    /// An item completed.
    ItemCompleted(AgentItem),
    /// Legacy payload that was not valid JSON, kept as text.
    LegacyText(String),
    /// Any record without a recognized shape.
    Unknown(Value),
}

/// Item carried by `item.started` / `item.completed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentItem {
    /// Final assistant message.
    AgentMessage {
        /// Item id.
        #[serde(default)]
        id: Option<String>,
        /// Message text.
        #[serde(default)]
        text: Option<String>,
    },
    /// Model reasoning summary.
    Reasoning {
        /// Item id.
        #[serde(default)]
        id: Option<String>,
        /// Reasoning text.
        #[serde(default)]
        text: Option<String>,
    },
    /// Shell command run by the agent.
    CommandExecution {
        /// Item id; correlates start and completion.
        #[serde(default)]
        id: Option<String>,
        /// Command line (string or argv array).
        #[serde(default)]
        command: Option<Value>,
        /// Combined command output.
        #[serde(default)]
        aggregated_output: Option<String>,
        /// Exit code once finished.
        #[serde(default)]
        exit_code: Option<i32>,
    },
    /// Shell call in the older item naming.
    #[serde(alias = "shell")]
    LocalShellCall {
        /// Item id.
        #[serde(default)]
        id: Option<String>,
        /// Command line (string or argv array).
        #[serde(default)]
        command: Option<Value>,
    },
    /// Web search or page open.
    WebSearch {
        /// Item id.
        #[serde(default)]
        id: Option<String>,
        /// Search query.
        #[serde(default)]
        query: Option<String>,
        /// Action object (`search`, `open_page`, …).
        #[serde(default)]
        action: Option<Value>,
    },
    /// Any other tool item, kept raw.
    #[serde(skip)]
    Other(Value),
}

impl AgentItem {
    /// Decode an item object, keeping unrecognized shapes as [`AgentItem::Other`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(Self::Other(value))
    }

    /// Item id, when the item carries one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::AgentMessage { id, .. }
            | Self::Reasoning { id, .. }
            | Self::CommandExecution { id, .. }
            | Self::LocalShellCall { id, .. }
            | Self::WebSearch { id, .. } => id.as_deref(),
            Self::Other(value) => value.get("id").and_then(Value::as_str),
        }
    }

    /// Whether the item is a tool invocation rather than a message or thought.
    #[must_use]
    pub fn is_tool(&self) -> bool {
        match self {
            Self::AgentMessage { .. } | Self::Reasoning { .. } => false,
            Self::Other(value) => !matches!(
                value.get("type").and_then(Value::as_str),
                Some("agent_message" | "reasoning")
            ),
            _ => true,
        }
    }

    /// Tool name used in transcripts.
    #[must_use]
    pub fn tool_name(&self) -> String {
        match self {
            Self::AgentMessage { .. } => "agent_message".into(),
            Self::Reasoning { .. } => "reasoning".into(),
            Self::CommandExecution { .. } => "command_execution".into(),
            Self::LocalShellCall { .. } => "local_shell_call".into(),
            Self::WebSearch { .. } => "web_search".into(),
            Self::Other(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("tool")
                .to_owned(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },
    #[serde(rename = "turn.started")]
    TurnStarted {},
    #[serde(rename = "turn.cancelled")]
    TurnCancelled {},
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<Value>,
    },
    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<Value>,
    },
    #[serde(rename = "item.started")]
    ItemStarted { item: Value },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: Value },
}

impl AgentEvent {
    /// Decode a parsed JSON record.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        if value.get("type").is_none() {
            if let Some(msg) = value.get("msg") {
                return decode_legacy(msg);
            }
        }

        let Ok(wire) = serde_json::from_value::<WireEvent>(value.clone()) else {
            return Self::Unknown(value);
        };

        match wire {
            WireEvent::ThreadStarted { thread_id } => Self::ThreadStarted { thread_id },
            WireEvent::TurnStarted {} => Self::TurnStarted,
            WireEvent::TurnCancelled {} => Self::TurnCancelled,
            WireEvent::TurnCompleted { usage } => Self::TurnCompleted {
                usage: match usage {
                    Some(Value::Object(map)) => Some(map),
                    _ => None,
                },
            },
            WireEvent::TurnFailed { error } => Self::TurnFailed {
                message: error
                    .as_ref()
                    .and_then(|err| err.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            WireEvent::Error { message } => Self::Error {
                message: message.as_ref().and_then(Value::as_str).map(str::to_owned),
            },
            WireEvent::ItemStarted { item } => Self::ItemStarted(AgentItem::from_value(item)),
            WireEvent::ItemCompleted { item } => Self::ItemCompleted(AgentItem::from_value(item)),
        }
    }

    /// Conversation reference revealed by this event, if any.
    #[must_use]
    pub fn conversation_ref(&self) -> Option<&str> {
        match self {
            Self::ThreadStarted { thread_id } => Some(thread_id),
            _ => None,
        }
    }
}

/// Parse one line of agent output.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns `AppError::Process("malformed json: …")` if the line is not JSON.
pub fn parse_event_line(line: &str) -> Result<Option<AgentEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line)
        .map_err(|err| AppError::Process(format!("malformed json: {err}")))?;
    Ok(Some(AgentEvent::from_value(value)))
}

/// Older agents wrapped each event as `{"msg": "<escaped json>"}`, and some
/// emitted the object unescaped. The nested payload uses its own type names.
fn decode_legacy(msg: &Value) -> AgentEvent {
    let inner = match msg {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(inner @ Value::Object(_)) => inner,
            Ok(_) | Err(_) => {
                debug!("legacy payload is not a JSON object, relaying as text");
                return AgentEvent::LegacyText(raw.clone());
            }
        },
        Value::Object(_) => msg.clone(),
        other => return AgentEvent::Unknown(other.clone()),
    };

    let text_of = |key: &str| inner.get(key).and_then(Value::as_str).map(str::to_owned);
    match inner.get("type").and_then(Value::as_str) {
        Some("agent_message") => AgentEvent::ItemCompleted(AgentItem::AgentMessage {
            id: None,
            text: text_of("message"),
        }),
        Some("agent_reasoning") => AgentEvent::ItemCompleted(AgentItem::Reasoning {
            id: None,
            text: text_of("text"),
        }),
        Some("exec_command_begin") => AgentEvent::ItemStarted(AgentItem::LocalShellCall {
            id: text_of("call_id"),
            command: inner.get("command").cloned(),
        }),
        Some("error") => AgentEvent::Error {
            message: text_of("message"),
        },
        _ => AgentEvent::from_value(inner),
    }
}
