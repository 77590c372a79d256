//! Flat-file persistence: registry, managed transcripts, and agent logs.

pub mod agent_log;
pub mod atomic;
pub mod registry_store;
pub mod transcript_store;
