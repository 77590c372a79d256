#![forbid(unsafe_code)]

pub mod attachments;
pub mod backend;
pub mod commands;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod outbound;
pub mod persistence;
pub mod relay;
pub mod slack;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
