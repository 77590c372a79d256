//! Agent output stream and the per-run relay state.
//!
//! stdout and stderr are framed separately with [`EventCodec`] and merged
//! into one line stream; ordering is preserved within each pipe.

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::process::Child;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::models::session::Verbosity;
use crate::relay::codec::EventCodec;
use crate::relay::event::{parse_event_line, AgentEvent};
use crate::relay::format::{notification_for, Notification};
use crate::{AppError, Result};

/// Merged stdout+stderr line stream of a child.
pub type LineStream = BoxStream<'static, Result<String>>;

/// Take the child's output pipes and merge them into one line stream.
///
/// # Errors
///
/// Returns `AppError::Process` if stdout was not piped.
pub fn merged_lines(child: &mut Child) -> Result<LineStream> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("agent stdout was not captured".into()))?;
    let out = FramedRead::new(stdout, EventCodec::new());

    match child.stderr.take() {
        Some(stderr) => {
            let err = FramedRead::new(stderr, EventCodec::new());
            Ok(stream::select(out, err).boxed())
        }
        None => Ok(out.boxed()),
    }
}

/// Result of feeding one line to the relay.
#[derive(Debug, Default, PartialEq)]
pub struct RelayStep {
    /// Set when the line revealed a new conversation reference.
    pub new_conversation_ref: Option<String>,
    /// Notification to deliver, if the policy emits one.
    pub notification: Option<Notification>,
}

/// Per-run relay state: classification, policy, and the event accumulator.
#[derive(Debug)]
pub struct Relay {
    spawn_id: String,
    verbosity: Verbosity,
    dump_unknown: bool,
    conversation_ref: Option<String>,
    accumulated: Vec<AgentEvent>,
}

impl Relay {
    /// Start relaying for a run of `spawn_id`.
    #[must_use]
    pub fn new(
        spawn_id: impl Into<String>,
        verbosity: Verbosity,
        dump_unknown: bool,
        conversation_ref: Option<String>,
    ) -> Self {
        Self {
            spawn_id: spawn_id.into(),
            verbosity,
            dump_unknown,
            conversation_ref,
            accumulated: Vec::new(),
        }
    }

    /// Classify one output line. Malformed lines are logged and skipped.
    pub fn ingest(&mut self, line: &str) -> RelayStep {
        let event = match parse_event_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return RelayStep::default(),
            Err(err) => {
                warn!(spawn_id = %self.spawn_id, %err, line, "skipping unparseable agent output");
                return RelayStep::default();
            }
        };
        debug!(spawn_id = %self.spawn_id, line, "agent event");

        let mut step = RelayStep::default();
        if let Some(found) = event.conversation_ref() {
            if self.conversation_ref.as_deref() != Some(found) {
                self.conversation_ref = Some(found.to_owned());
                step.new_conversation_ref = Some(found.to_owned());
            }
        }
        step.notification = notification_for(&event, self.verbosity, self.dump_unknown);
        self.accumulated.push(event);
        step
    }

    /// Conversation reference as currently known to this run.
    #[must_use]
    pub fn conversation_ref(&self) -> Option<&str> {
        self.conversation_ref.as_deref()
    }

    /// Events accumulated so far.
    #[must_use]
    pub fn events(&self) -> &[AgentEvent] {
        &self.accumulated
    }
}
