//! Mapping of agent events to chat notifications under a verbosity policy.

use serde_json::{Map, Value};

use crate::models::session::Verbosity;
use crate::relay::event::{AgentEvent, AgentItem};

const THOUGHT_MARKER: &str = "💭💭💭💭💭";

/// One semantic notification produced by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Body text.
    pub text: String,
    /// Suffix after the spawn id in the header, e.g. ` responded`.
    pub action: &'static str,
    /// Whether the requester should be mentioned.
    pub critical: bool,
}

impl Notification {
    fn new(action: &'static str, text: String) -> Self {
        Self {
            text,
            action,
            critical: false,
        }
    }

    /// End-of-run notice, always critical.
    #[must_use]
    pub fn completion(spawn_id: &str) -> Self {
        Self {
            text: format!("AGENT **{spawn_id}** COMPLETED HIS MISSION!"),
            action: "",
            critical: true,
        }
    }

    /// Full message text: `[<@user> ]**id**<action>:\n<text>`.
    #[must_use]
    pub fn render(&self, spawn_id: &str, user: Option<&str>) -> String {
        let ping = match (self.critical, user) {
            (true, Some(user)) => format!("<@{user}> "),
            _ => String::new(),
        };
        format!("{ping}**{spawn_id}**{}:\n{}", self.action, self.text)
    }
}

/// Notification for `event`, or `None` when the policy suppresses it.
#[must_use]
pub fn notification_for(
    event: &AgentEvent,
    verbosity: Verbosity,
    dump_unknown: bool,
) -> Option<Notification> {
    let verbose = verbosity == Verbosity::Verbose;
    match event {
        AgentEvent::Error { message } | AgentEvent::TurnFailed { message } => message
            .as_deref()
            .filter(|msg| !msg.is_empty())
            .map(|msg| Notification::new(" error", code_block(msg))),
        AgentEvent::TurnCompleted { usage } => usage
            .as_ref()
            .map(|usage| Notification::new(" used tokens", token_usage_summary(usage))),
        AgentEvent::ItemCompleted(item) => item_notification(item, true, verbose),
        AgentEvent::ItemStarted(item) => item_notification(item, false, verbose),
        AgentEvent::LegacyText(text) => {
            (!text.is_empty()).then(|| Notification::new(" responded", text.clone()))
        }
        AgentEvent::ThreadStarted { .. } | AgentEvent::TurnStarted | AgentEvent::TurnCancelled => {
            None
        }
        AgentEvent::Unknown(raw) => (verbose && dump_unknown)
            .then(|| Notification::new(" emitted", code_block(&pretty(raw)))),
    }
}

fn item_notification(item: &AgentItem, completed: bool, verbose: bool) -> Option<Notification> {
    match item {
        AgentItem::AgentMessage { text, .. } => {
            if !completed {
                return None;
            }
            non_empty(text.as_deref()).map(|msg| Notification::new(" responded", msg.to_owned()))
        }
        AgentItem::Reasoning { text, .. } => {
            if !(verbose && completed) {
                return None;
            }
            non_empty(text.as_deref()).map(|msg| Notification::new(" thought", thought(msg)))
        }
        // Message-typed items whose fields did not decode.
        AgentItem::Other(_) if !item.is_tool() => None,
        _ => {
            if !verbose {
                return None;
            }
            let action = if completed { " tool" } else { " started tool" };
            Some(Notification::new(action, tool_summary(item)))
        }
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|msg| !msg.is_empty())
}

/// Thought text framed by marker lines.
#[must_use]
pub fn thought(msg: &str) -> String {
    format!("{THOUGHT_MARKER}\n{msg}\n{THOUGHT_MARKER}")
}

/// Inline code span.
#[must_use]
pub fn command(msg: &str) -> String {
    format!("`{msg}`")
}

/// Fenced code block.
#[must_use]
pub fn code_block(msg: &str) -> String {
    format!("```\n{msg}\n```")
}

/// `Tokens: in=…, cached_in=…, …`, or a JSON block when no known counter is present.
#[must_use]
pub fn token_usage_summary(usage: &Map<String, Value>) -> String {
    const COUNTERS: [(&str, &str); 5] = [
        ("input_tokens", "in"),
        ("cached_input_tokens", "cached_in"),
        ("output_tokens", "out"),
        ("reasoning_output_tokens", "reasoning_out"),
        ("total_tokens", "total"),
    ];

    let parts: Vec<String> = COUNTERS
        .iter()
        .filter_map(|(key, label)| {
            usage
                .get(*key)
                .and_then(Value::as_i64)
                .map(|count| format!("{label}={count}"))
        })
        .collect();

    if parts.is_empty() {
        code_block(&pretty(&Value::Object(usage.clone())))
    } else {
        format!("Tokens: {}", parts.join(", "))
    }
}

/// One-line rendering of a tool item, with a JSON fallback.
#[must_use]
pub fn tool_summary(item: &AgentItem) -> String {
    match item {
        AgentItem::WebSearch { query, action, .. } => {
            web_search_summary(query.as_deref(), action.as_ref())
        }
        AgentItem::CommandExecution {
            command: Some(cmd), ..
        }
        | AgentItem::LocalShellCall {
            command: Some(cmd), ..
        } => command_line(cmd).map_or_else(|| fallback(item), |line| command(&line)),
        _ => fallback(item),
    }
}

fn web_search_summary(query: Option<&str>, action: Option<&Value>) -> String {
    let field = |key: &str| {
        action
            .and_then(|action| action.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };
    let query = query.filter(|q| !q.is_empty());

    match field("type") {
        Some("search") => match field("query").or(query) {
            Some(q) => command(&format!("web_search \"{q}\"")),
            None => command("web_search"),
        },
        Some("open_page") => match field("url").or(query) {
            Some(url) => command(&format!("web_open {url}")),
            None => command("web_open"),
        },
        _ => match query {
            Some(q) => command(&format!("web_search {q}")),
            None => command("web_search"),
        },
    }
}

fn command_line(cmd: &Value) -> Option<String> {
    match cmd {
        Value::String(line) => Some(line.clone()),
        Value::Array(argv) => Some(
            argv.iter()
                .map(|arg| arg.as_str().map_or_else(|| arg.to_string(), str::to_owned))
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
}

fn fallback(item: &AgentItem) -> String {
    let (id, action, query) = match item {
        AgentItem::Other(raw) => (
            raw.get("id").cloned(),
            raw.get("action").cloned(),
            raw.get("query").cloned(),
        ),
        AgentItem::WebSearch { id, query, action } => (
            id.clone().map(Value::String),
            action.clone(),
            query.clone().map(Value::String),
        ),
        _ => (item.id().map(|id| Value::String(id.to_owned())), None, None),
    };
    let minimal = serde_json::json!({
        "type": item.tool_name(),
        "id": id,
        "action": action,
        "query": query,
    });
    code_block(&pretty(&minimal))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
