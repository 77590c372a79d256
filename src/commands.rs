//! Operator command surface and inbound prompt handling.
//!
//! Commands arrive as a name plus `key=value` text (positional values are
//! accepted for the leading required arguments), are parsed into
//! [`Command`], and run against the [`Orchestrator`]. Every outcome is
//! rendered into reply lines for the chat adapter to post. Validation
//! failures are echoed to the operator; anything else is logged and
//! answered with a generic "Internal error".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tracing::{error, info};

use crate::attachments::{uploads_dir, Attachment, AttachmentFetcher};
use crate::config::GlobalConfig;
use crate::models::run::format_elapsed;
use crate::models::session::{NotificationTarget, SessionConfig};
use crate::orchestrator::session_manager::DELETE_ALL_CONFIRMATION;
use crate::orchestrator::Orchestrator;
use crate::{AppError, Result};

/// Reply sent when a request fails for a non-validation reason.
pub const INTERNAL_ERROR_REPLY: &str = "Internal error";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register a new spawn.
    Spawn {
        /// Requested id.
        spawn_id: String,
        /// Requested settings.
        config: SessionConfig,
    },
    /// Change a spawn's provider.
    SetProvider {
        /// Target spawn.
        spawn_id: String,
        /// New provider.
        provider: String,
    },
    /// Change a spawn's model.
    SetModel {
        /// Target spawn.
        spawn_id: String,
        /// New model.
        model: String,
    },
    /// Kill a spawn's runs.
    Kill {
        /// Target spawn.
        spawn_id: String,
        /// Delete the spawn afterwards.
        delete: bool,
        /// Roll back the interrupted turn.
        revert: bool,
    },
    /// Kill and delete everything.
    DeleteAll {
        /// Must equal `CONFIRM`.
        confirmation: String,
    },
    /// Show spawns and their running processes.
    List,
    /// Replace the global instructions.
    SetInstructions {
        /// New instructions text.
        instructions: String,
    },
}

/// `key=value` arguments with leading positionals.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CommandArgs {
    positional: Vec<String>,
    named: HashMap<String, String>,
}

impl CommandArgs {
    /// Split `text` on whitespace, honoring double quotes.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut args = Self::default();
        for token in tokenize(text) {
            match token.split_once('=') {
                Some((key, value)) if !key.is_empty() && !key.contains('"') => {
                    args.named
                        .insert(key.trim().to_lowercase(), value.to_owned());
                }
                _ => args.positional.push(token),
            }
        }
        args
    }

    /// Named value, falling back to the positional at `index`.
    fn value(&self, key: &str, index: usize) -> Option<&str> {
        self.named
            .get(key)
            .map(String::as_str)
            .or_else(|| self.positional.get(index).map(String::as_str))
    }

    fn required(&self, key: &str, index: usize) -> Result<String> {
        self.value(key, index)
            .map(str::to_owned)
            .ok_or_else(|| AppError::InvalidConfig(format!("missing argument '{key}'")))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        self.named
            .get(key)
            .map_or(Ok(default), |raw| parse_bool(key, raw))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        tokens.push(current);
    }
    tokens
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        other => Err(AppError::InvalidConfig(format!(
            "'{key}' must be true or false, got '{other}'"
        ))),
    }
}

impl Command {
    /// Parse a command by name (with or without a leading `/`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` for unknown commands, missing
    /// arguments, or malformed values.
    pub fn parse(name: &str, text: &str, defaults: &GlobalConfig) -> Result<Self> {
        let args = CommandArgs::parse(text);
        match name.trim_start_matches('/') {
            "spawn" => {
                let config = SessionConfig {
                    working_dir: PathBuf::from(args.required("working_dir", 1)?),
                    provider: args
                        .value("provider", 2)
                        .map_or_else(|| defaults.default_provider.clone(), str::to_owned),
                    model: args.value("model", 3).unwrap_or("default").to_owned(),
                    execution_mode: args
                        .named
                        .get("execution_mode")
                        .map_or(Ok(defaults.default_execution_mode), |raw| raw.parse())?,
                    verbosity: args
                        .named
                        .get("verbosity")
                        .map_or(Ok(defaults.default_verbosity), |raw| raw.parse())?,
                    leak_env: args.flag("leak_env", false)?,
                    create_dir: args.flag("allow_create_working_dir", true)?,
                };
                Ok(Self::Spawn {
                    spawn_id: args.required("spawn_id", 0)?,
                    config,
                })
            }
            "set_provider" => Ok(Self::SetProvider {
                spawn_id: args.required("spawn_id", 0)?,
                provider: args
                    .value("provider", 1)
                    .map_or_else(|| defaults.default_provider.clone(), str::to_owned),
            }),
            "set_model" => Ok(Self::SetModel {
                spawn_id: args.required("spawn_id", 0)?,
                model: args
                    .value("model", 1)
                    .map_or_else(|| defaults.default_model.clone(), str::to_owned),
            }),
            "kill" => Ok(Self::Kill {
                spawn_id: args.required("spawn_id", 0)?,
                delete: args.flag("delete", false)?,
                revert: args.flag("revert_chat_state", true)?,
            }),
            "delete_all_agents" => Ok(Self::DeleteAll {
                confirmation: args.value("confirmation", 0).unwrap_or_default().to_owned(),
            }),
            "list" => Ok(Self::List),
            "set_instructions" => {
                let instructions = text.trim();
                if instructions.is_empty() {
                    return Err(AppError::InvalidConfig("missing argument 'new_instructions'".into()));
                }
                Ok(Self::SetInstructions {
                    instructions: instructions.to_owned(),
                })
            }
            other => Err(AppError::InvalidConfig(format!("unknown command '{other}'"))),
        }
    }

    /// Run the command and render the replies, in order.
    pub async fn execute(self, orchestrator: &Orchestrator) -> Vec<String> {
        match self {
            Self::Spawn { spawn_id, config } => spawn(orchestrator, &spawn_id, &config).await,
            Self::SetProvider { spawn_id, provider } => {
                match orchestrator.set_provider(&spawn_id, &provider).await {
                    Ok(provider) => vec![format!("✅ Provider for **{spawn_id}** set to '{provider}'.")],
                    Err(err) => vec![failure_reply(&spawn_id, &err)],
                }
            }
            Self::SetModel { spawn_id, model } => match orchestrator.set_model(&spawn_id, &model).await {
                Ok(()) => vec![format!("✅ Model for **{spawn_id}** set to '{}'.", model.trim())],
                Err(err) => vec![failure_reply(&spawn_id, &err)],
            },
            Self::Kill {
                spawn_id,
                delete,
                revert,
            } => kill(orchestrator, &spawn_id, delete, revert).await,
            Self::DeleteAll { confirmation } => {
                if confirmation != DELETE_ALL_CONFIRMATION {
                    return vec![format!(
                        "❌ You must confirm this action by typing {DELETE_ALL_CONFIRMATION} in the confirmation field"
                    )];
                }
                match orchestrator.delete_all(&confirmation).await {
                    Ok(_) => vec!["✅ Killed and deleted all agents and docker containers - EVERYTHING!".into()],
                    Err(err) => vec![failure_reply("", &err)],
                }
            }
            Self::List => vec![list(orchestrator).await],
            Self::SetInstructions { instructions } => {
                orchestrator.set_instructions(instructions).await;
                info!("instructions updated");
                vec!["✅ Instructions updated".into()]
            }
        }
    }
}

async fn spawn(orchestrator: &Orchestrator, spawn_id: &str, config: &SessionConfig) -> Vec<String> {
    match orchestrator.create_session(spawn_id, config).await {
        Ok(new) => {
            let mut replies = Vec::with_capacity(2);
            if new.create_dir {
                replies.push(format!("ℹ️ Creating '{}'.", new.record.working_dir.display()));
            }
            replies.push(format!(
                "✅ Spawn ID **{spawn_id}** registered. Mention me with 'to {spawn_id}: <message>' to send prompts."
            ));
            replies
        }
        Err(err) => vec![failure_reply(spawn_id, &err)],
    }
}

async fn kill(orchestrator: &Orchestrator, spawn_id: &str, delete: bool, revert: bool) -> Vec<String> {
    match orchestrator.kill_session(spawn_id, delete, revert).await {
        Ok(report) if report.killed == 0 => {
            let suffix = if report.deleted {
                format!(" (permanently deleted agent **{spawn_id}**).")
            } else {
                ".".into()
            };
            vec![format!("ℹ️  No active processes for spawn ID **{spawn_id}**{suffix}")]
        }
        Ok(report) => {
            let mut replies: Vec<String> = (0..report.killed)
                .map(|_| format!("✅ Killed a process for agent **{spawn_id}**."))
                .collect();
            replies.push(format!(
                "✅ Killed {} process(es) for spawn ID **{spawn_id}**.",
                report.killed
            ));
            replies
        }
        Err(err) => vec![failure_reply(spawn_id, &err)],
    }
}

/// Render the `/list` reply.
pub async fn list(orchestrator: &Orchestrator) -> String {
    let statuses = orchestrator.list().await;
    if statuses.is_empty() {
        return "ℹ️  No spawn workers registered.".into();
    }
    let mut lines = Vec::new();
    for status in statuses {
        let header = format!(
            "**{}** ({}, {})",
            status.spawn_id, status.execution_mode, status.verbosity
        );
        if status.runs.is_empty() {
            lines.push(format!("{header}: no active processes"));
            continue;
        }
        lines.push(format!("{header}:"));
        for (pid, elapsed) in status.runs {
            let pid = pid.map_or_else(|| "?".to_owned(), |pid| pid.to_string());
            lines.push(format!(" • PID {pid} – running for {}", format_elapsed(elapsed)));
        }
    }
    lines.join("\n")
}

/// Reply for a failed operation on `spawn_id`.
///
/// Non-validation errors are logged here and hidden from the requester.
#[must_use]
pub fn failure_reply(spawn_id: &str, err: &AppError) -> String {
    match err {
        AppError::DuplicateId(_) => format!("❌ Spawn ID **{spawn_id}** is already in use."),
        AppError::NotFound(_) => format!("❌ Unknown spawn ID **{spawn_id}**."),
        err if err.is_validation() => format!("❌ {}", err.detail()),
        err => {
            error!(spawn_id, %err, "request failed");
            INTERNAL_ERROR_REPLY.into()
        }
    }
}

/// How a chat message addressed to the bot was understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mention {
    /// `<@BOT> to <id>: <request>`.
    Prompt {
        /// Addressed spawn.
        spawn_id: String,
        /// Request text.
        request: String,
    },
    /// Looks like a prompt, but the id part is malformed.
    Malformed,
    /// Not meant for an agent.
    Ignored,
}

/// Matches `<@BOT> to <id>: <request>` messages.
#[derive(Debug, Clone)]
pub struct MentionParser {
    strict: Regex,
    loose: Regex,
}

impl MentionParser {
    /// Build the matchers for the bot's user id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the patterns fail to compile.
    pub fn new(bot_user_id: &str) -> Result<Self> {
        let bot = regex::escape(bot_user_id);
        let compile = |pattern: String| {
            Regex::new(&pattern)
                .map_err(|err| AppError::Config(format!("invalid mention pattern: {err}")))
        };
        Ok(Self {
            strict: compile(format!(
                r"(?s)^<@!?{bot}>\s+to\s+([A-Za-z0-9_-]+?):\s*(.+)"
            ))?,
            loose: compile(format!(r"(?s)^<@!?{bot}>\s+to\s+(.+?):\s*(.+)"))?,
        })
    }

    /// The pattern prompts must match, shown in the syntax hint.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.strict.as_str()
    }

    /// Classify a message text.
    #[must_use]
    pub fn parse(&self, text: &str) -> Mention {
        let text = text.trim();
        if let Some(captures) = self.strict.captures(text) {
            let request = captures[2].trim();
            if !request.is_empty() {
                return Mention::Prompt {
                    spawn_id: captures[1].to_owned(),
                    request: request.to_owned(),
                };
            }
        }
        if self.loose.is_match(text) {
            Mention::Malformed
        } else {
            Mention::Ignored
        }
    }
}

/// An authorized chat message mentioning the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel the message was posted in.
    pub channel: String,
    /// Author.
    pub user: String,
    /// Platform message id; replies reference it.
    pub message_id: String,
    /// Raw text.
    pub text: String,
    /// Attached files.
    pub attachments: Vec<Attachment>,
}

/// Handle an inbound message: parse, save attachments, start the run.
/// Returns the replies to post in reference to the message.
pub async fn handle_inbound(
    orchestrator: &Arc<Orchestrator>,
    parser: &MentionParser,
    fetcher: &AttachmentFetcher,
    message: InboundMessage,
) -> Vec<String> {
    let (spawn_id, request) = match parser.parse(&message.text) {
        Mention::Ignored => return Vec::new(),
        Mention::Malformed => {
            return vec![format!(
                "ℹ️ In case you meant to DM an agent, your syntax is incorrect. This is the pattern by which messages are matched: `{}`",
                parser.pattern()
            )]
        }
        Mention::Prompt { spawn_id, request } => (spawn_id, request),
    };

    let working_dir = {
        let registry = orchestrator.registry.lock().await;
        match registry.get(&spawn_id) {
            Ok(entry) => entry.record.working_dir.clone(),
            Err(_) => return vec![format!("❌ Unknown spawn ID **{spawn_id}**.")],
        }
    };
    info!(%spawn_id, user = %message.user, "prompt accepted");

    let saved = if message.attachments.is_empty() {
        Vec::new()
    } else {
        let dir = uploads_dir(&working_dir, &spawn_id);
        match fetcher.save_all(&dir, &message.attachments).await {
            Ok(saved) => saved,
            Err(err) => return vec![failure_reply(&spawn_id, &err)],
        }
    };

    let target = NotificationTarget {
        channel: message.channel,
        user: message.user,
        reply_to: orchestrator
            .config
            .outbound
            .reply_to_request
            .then_some(message.message_id),
    };
    match orchestrator.start_run(&spawn_id, &request, &saved, target).await {
        Ok(_) => vec![format!("✅ AGENT **{spawn_id}** DEPLOYED...")],
        Err(err) => vec![failure_reply(&spawn_id, &err)],
    }
}
