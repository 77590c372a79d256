//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Spawn identifier is empty, too long, or uses forbidden characters.
    InvalidId(String),
    /// A spawn with the requested identifier already exists.
    DuplicateId(String),
    /// Session settings rejected by the configured policy.
    InvalidConfig(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Container runtime or host launch failure.
    Backend(String),
    /// Agent process I/O or supervision failure.
    Process(String),
    /// Transcript snapshot, restore, or commit failure.
    Transcript(String),
    /// Slack API or Socket Mode failure.
    Slack(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidId(msg) => write!(f, "invalid spawn id: {msg}"),
            Self::DuplicateId(msg) => write!(f, "duplicate spawn id: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid session config: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Transcript(msg) => write!(f, "transcript: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether the error stems from operator input rather than a system fault.
    ///
    /// Validation errors are echoed back verbatim; everything else is
    /// reported generically and logged.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidId(_) | Self::DuplicateId(_) | Self::InvalidConfig(_) | Self::NotFound(_)
        )
    }

    /// The message without its category prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::InvalidId(msg)
            | Self::DuplicateId(msg)
            | Self::InvalidConfig(msg)
            | Self::NotFound(msg)
            | Self::Backend(msg)
            | Self::Process(msg)
            | Self::Transcript(msg)
            | Self::Slack(msg)
            | Self::Unauthorized(msg)
            | Self::Io(msg) => msg,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}
