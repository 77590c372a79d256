//! Spawn session model: durable record, runtime entry, and validation.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::run::RunHandle;
use crate::{AppError, Result};

/// Maximum length of a spawn identifier.
pub const MAX_SPAWN_ID_LEN: usize = 64;

/// Where the agent process runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Inside a dedicated, persistent container per spawn.
    #[default]
    #[serde(alias = "docker")]
    Container,
    /// Directly on the host, in the spawn's working directory.
    Host,
}

impl Display for ExecutionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container => f.write_str("container"),
            Self::Host => f.write_str("host"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "container" | "docker" => Ok(Self::Container),
            "host" => Ok(Self::Host),
            other => Err(AppError::InvalidConfig(format!(
                "unknown execution mode '{other}'"
            ))),
        }
    }
}

/// Which agent events are relayed to chat.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Final responses, token usage, and errors only.
    #[default]
    Answers,
    /// Also reasoning and tool invocations.
    Verbose,
}

impl Display for Verbosity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Answers => f.write_str("answers"),
            Self::Verbose => f.write_str("verbose"),
        }
    }
}

impl FromStr for Verbosity {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "answers" => Ok(Self::Answers),
            "verbose" => Ok(Self::Verbose),
            other => Err(AppError::InvalidConfig(format!("unknown verbosity '{other}'"))),
        }
    }
}

/// Durable part of a spawn, serialized into the registry file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// Operator-chosen identifier; immutable.
    pub spawn_id: String,
    /// Agent-side conversation id used to resume multi-turn state.
    pub conversation_ref: Option<String>,
    /// Model provider passed to the agent.
    pub provider: String,
    /// Model name; `default` lets the agent choose.
    pub model: String,
    /// Absolute working directory of the agent.
    pub working_dir: PathBuf,
    /// Backend the spawn is bound to; immutable.
    pub execution_mode: ExecutionMode,
    /// Relay verbosity.
    pub verbosity: Verbosity,
    /// Pass the full host environment to the agent.
    pub leak_env: bool,
}

/// Requested settings for a new spawn, as received from a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model provider.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Working directory (may start with `~`).
    pub working_dir: PathBuf,
    /// Requested backend.
    pub execution_mode: ExecutionMode,
    /// Relay verbosity.
    pub verbosity: Verbosity,
    /// Pass the full host environment to the agent.
    pub leak_env: bool,
    /// Create `working_dir` when it does not exist.
    pub create_dir: bool,
}

/// Last known place to deliver notifications for a spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTarget {
    /// Chat channel identifier.
    pub channel: String,
    /// User who sent the most recent prompt; mentioned on critical notices.
    pub user: String,
    /// Message to thread replies under, when reply threading is enabled.
    pub reply_to: Option<String>,
}

/// Runtime registry entry: the durable record plus live, unpersisted state.
#[derive(Debug)]
pub struct SessionEntry {
    /// Persisted settings.
    pub record: SessionRecord,
    /// Where notifications go; refreshed on every inbound prompt.
    pub target: Option<NotificationTarget>,
    /// Runs currently executing, in start order.
    pub running: Vec<RunHandle>,
}

impl SessionEntry {
    /// Wrap a durable record with empty runtime state.
    #[must_use]
    pub fn new(record: SessionRecord) -> Self {
        Self {
            record,
            target: None,
            running: Vec::new(),
        }
    }
}

/// Validate a spawn identifier: 1..=64 chars of `[A-Za-z0-9_-]`.
///
/// # Errors
///
/// Returns `AppError::InvalidId` describing the first violated rule.
pub fn validate_spawn_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(AppError::InvalidId("spawn id must not be empty".into()));
    }
    let len = id.chars().count();
    if len > MAX_SPAWN_ID_LEN {
        return Err(AppError::InvalidId(format!(
            "'{id}' too long - must be at most {MAX_SPAWN_ID_LEN} characters, but is {len}"
        )));
    }
    if !id.chars().all(is_spawn_id_char) {
        return Err(AppError::InvalidId(format!(
            "'{id}' contains invalid characters - only letters, digits, '-' and '_' allowed"
        )));
    }
    Ok(())
}

/// Whether `c` may appear in a spawn identifier.
#[must_use]
pub fn is_spawn_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}
