//! Domain models for spawns, runs, and transcripts.

pub mod run;
pub mod session;
pub mod transcript;
