//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::models::session::{ExecutionMode, Verbosity};
use crate::{AppError, Result};

/// Nested Slack configuration for Socket Mode connectivity.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// not from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// How the agent binary is invoked and where it keeps its own state.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary name or path (resolved through `PATH` inside containers).
    #[serde(default = "default_agent_binary")]
    pub binary: String,
    /// Agent home directory holding its session logs and credentials.
    #[serde(default = "default_agent_home")]
    pub home_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            home_dir: default_agent_home(),
        }
    }
}

fn default_agent_binary() -> String {
    "codex".into()
}

fn default_agent_home() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || PathBuf::from(".codex"),
        |home| PathBuf::from(home).join(".codex"),
    )
}

/// Container runtime settings for container-mode spawns.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ContainerConfig {
    /// Container runtime CLI (e.g., `docker`, `podman`).
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Image every spawn container is created from.
    #[serde(default)]
    pub image: Option<String>,
    /// CPU limit passed as `--cpus`.
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    /// Memory limit in GiB passed as `--memory <n>g`.
    #[serde(default = "default_memory_gb")]
    pub memory_gb: f64,
    /// Grace period handed to `stop -t`.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Line the entrypoint prints once the container is ready.
    #[serde(default = "default_ready_sentinel")]
    pub ready_sentinel: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            image: None,
            cpus: default_cpus(),
            memory_gb: default_memory_gb(),
            stop_grace_seconds: default_stop_grace_seconds(),
            ready_sentinel: default_ready_sentinel(),
        }
    }
}

fn default_runtime() -> String {
    "docker".into()
}

fn default_cpus() -> f64 {
    1.0
}

fn default_memory_gb() -> f64 {
    4.0
}

fn default_stop_grace_seconds() -> u64 {
    5
}

fn default_ready_sentinel() -> String {
    "[==== DONE ====]".into()
}

/// Outbound delivery policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OutboundConfig {
    /// Maximum characters per delivered chat message.
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    /// Append a `... (N lines left)` note to non-final chunks.
    #[serde(default)]
    pub annotate_lines_left: bool,
    /// Wrap every chunk after the first in a code fence.
    #[serde(default)]
    pub bulk_as_code_block: bool,
    /// Thread notifications as replies to the requesting message.
    #[serde(default = "default_true")]
    pub reply_to_request: bool,
    /// Dump unrecognized agent events as raw JSON in verbose mode.
    #[serde(default)]
    pub dump_unknown_events: bool,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            message_limit: default_message_limit(),
            annotate_lines_left: false,
            bulk_as_code_block: false,
            reply_to_request: true,
            dump_unknown_events: false,
        }
    }
}

fn default_message_limit() -> usize {
    1950
}

fn default_true() -> bool {
    true
}

fn default_providers() -> Vec<String> {
    vec!["openai".into()]
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "codex-mini-latest".into()
}

fn default_instructions() -> String {
    "You are Codex, a highly autonomous AI coding agent that lives in the terminal. \
     You help users by completing tasks they assign you, e.g. writing, testing or \
     debugging code or doing research for them."
        .into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the registry file and managed transcripts.
    pub state_dir: PathBuf,
    /// Slack user IDs allowed to drive the bot.
    #[serde(default)]
    pub authorized_user_ids: Vec<String>,
    /// Providers a spawn may be configured with.
    #[serde(default = "default_providers")]
    pub allowed_providers: Vec<String>,
    /// Provider used when `/spawn` omits one.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model used by `/set_model` when none is given.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Verbosity used when `/spawn` omits one.
    #[serde(default)]
    pub default_verbosity: Verbosity,
    /// Execution mode used when `/spawn` omits one.
    #[serde(default)]
    pub default_execution_mode: ExecutionMode,
    /// Whether container-mode spawns may be created and run.
    #[serde(default = "default_true")]
    pub allow_container_execution: bool,
    /// Whether host-mode spawns may be created and run.
    #[serde(default)]
    pub allow_host_execution: bool,
    /// Whether spawns may inherit the full host environment.
    #[serde(default)]
    pub allow_leak_env: bool,
    /// Optional `KEY=VALUE` file merged into every agent environment.
    #[serde(default)]
    pub agent_env_file: Option<PathBuf>,
    /// Instructions prepended to every prompt.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Agent binary settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Container runtime settings.
    #[serde(default)]
    pub container: ContainerConfig,
    /// Outbound delivery policy.
    #[serde(default)]
    pub outbound: OutboundConfig,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Path of the persisted spawn registry.
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("spawns.json")
    }

    /// Directory of managed per-spawn transcripts.
    #[must_use]
    pub fn transcripts_dir(&self) -> PathBuf {
        self.state_dir.join("transcripts")
    }

    /// Whether the policy allows creating or running spawns in `mode`.
    #[must_use]
    pub fn allows_mode(&self, mode: ExecutionMode) -> bool {
        match mode {
            ExecutionMode::Container => self.allow_container_execution,
            ExecutionMode::Host => self.allow_host_execution,
        }
    }

    /// Whether `provider` is on the allow-list.
    #[must_use]
    pub fn allows_provider(&self, provider: &str) -> bool {
        self.allowed_providers.iter().any(|p| p == provider)
    }

    /// Validate that a Slack user is authorized to drive the bot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` if the user is not in the allowed list.
    pub fn ensure_authorized(&self, user_id: &str) -> Result<()> {
        if self.authorized_user_ids.iter().any(|id| id == user_id) {
            Ok(())
        } else {
            Err(AppError::Unauthorized("user is not authorized".into()))
        }
    }

    fn validate(&mut self) -> Result<()> {
        for provider in &mut self.allowed_providers {
            *provider = provider.trim().to_owned();
        }
        self.default_provider = self.default_provider.trim().to_owned();

        if !self.allows_provider(&self.default_provider) {
            return Err(AppError::Config(format!(
                "default_provider '{}' is not in allowed_providers",
                self.default_provider
            )));
        }

        if !self.allow_container_execution && !self.allow_host_execution {
            return Err(AppError::Config(
                "at least one of allow_container_execution / allow_host_execution must be set"
                    .into(),
            ));
        }

        if !self.allows_mode(self.default_execution_mode) {
            return Err(AppError::Config(format!(
                "default_execution_mode '{}' is disabled",
                self.default_execution_mode
            )));
        }

        if self.allow_container_execution && self.container.image.is_none() {
            return Err(AppError::Config(
                "container.image is required when container execution is allowed".into(),
            ));
        }

        if let Some(ref env_file) = self.agent_env_file {
            if !env_file.exists() {
                return Err(AppError::Config(format!(
                    "agent_env_file {} does not exist",
                    env_file.display()
                )));
            }
        }

        if self.outbound.message_limit == 0 {
            return Err(AppError::Config(
                "outbound.message_limit must be greater than zero".into(),
            ));
        }

        fs::create_dir_all(&self.state_dir)
            .map_err(|err| AppError::Config(format!("state_dir not creatable: {err}")))?;
        self.state_dir = self
            .state_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("state_dir invalid: {err}")))?;

        Ok(())
    }
}

/// Keychain service the Slack tokens are stored under.
const KEYCHAIN_SERVICE: &str = "spawn-relay";

/// Read `entry` from the OS keychain, falling back to `env_key`.
async fn load_credential(entry: &str, env_key: &str) -> Result<String> {
    if let Some(secret) = keychain_lookup(entry).await? {
        return Ok(secret);
    }
    env::var(env_key)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Config(format!(
                "{entry} is neither in the keychain nor set in {env_key}"
            ))
        })
}

async fn keychain_lookup(entry: &str) -> Result<Option<String>> {
    let name = entry.to_owned();
    // keyring blocks on the platform secret store.
    let lookup = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYCHAIN_SERVICE, &name).and_then(|item| item.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain lookup aborted: {err}")))?;

    match lookup {
        Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
        Ok(_) => {
            warn!(entry, "keychain entry is empty");
            Ok(None)
        }
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => {
            warn!(entry, %err, "keychain unavailable");
            Ok(None)
        }
    }
}
