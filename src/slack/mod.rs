//! Slack Socket Mode adapter: outbound queue, slash commands, mentions.

pub mod client;
pub mod commands;
pub mod events;

use std::sync::Arc;

use slack_morphism::prelude::SlackClientEventsUserState;
use tracing::warn;

use crate::attachments::AttachmentFetcher;
use crate::commands::MentionParser;
use crate::config::GlobalConfig;
use crate::orchestrator::Orchestrator;

/// State injected into every Socket Mode callback.
pub struct SlackState {
    /// Shared application state.
    pub orchestrator: Arc<Orchestrator>,
    /// Matches `<@BOT> to <id>: ...` for this bot's user id.
    pub mentions: MentionParser,
    /// Downloads files attached to prompts.
    pub fetcher: AttachmentFetcher,
}

async fn slack_state(state: &SlackClientEventsUserState) -> Option<Arc<SlackState>> {
    let guard = state.read().await;
    guard.get_user_state::<Arc<SlackState>>().cloned()
}

/// Allow-list check; refusals are logged as security events.
fn is_authorized(user_id: &str, config: &GlobalConfig) -> bool {
    match config.ensure_authorized(user_id) {
        Ok(()) => true,
        Err(err) => {
            warn!(user_id, %err, "request from user outside the allow-list ignored");
            false
        }
    }
}
