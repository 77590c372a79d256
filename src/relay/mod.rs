//! Event stream relay: agent NDJSON output to chat notifications.

pub mod codec;
pub mod event;
pub mod format;
pub mod reader;
