//! Slack slash command router.
//!
//! Slack expects an answer within three seconds, while kills may wait for
//! runs to settle. The command is acknowledged ephemerally right away and its
//! replies are posted to the channel once it finishes.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackCommandEvent,
    SlackCommandEventResponse, SlackMessageContent, SlackMessageResponseType,
};
use tracing::{info, info_span, warn, Instrument};

use crate::commands::Command;
use crate::slack::{is_authorized, slack_state};

/// Handle incoming slash commands routed via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are reported in the ephemeral response.
pub async fn handle_command(
    event: SlackCommandEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::AnyStdResult<SlackCommandEventResponse> {
    let command = event.command.to_string();
    let user_id = event.user_id.to_string();
    info!(%command, %user_id, "received slash command");

    let Some(app) = slack_state(&state).await else {
        warn!("slack state not available; cannot process command");
        return Ok(ephemeral("⚠️ Not ready yet, try again in a moment."));
    };
    if !is_authorized(&user_id, &app.orchestrator.config) {
        return Ok(ephemeral("❌ You are not allowed to use this bot."));
    }

    let text = event.text.unwrap_or_default();
    let parsed = match Command::parse(&command, &text, &app.orchestrator.config) {
        Ok(parsed) => parsed,
        Err(err) => return Ok(ephemeral(format!("❌ {}", err.detail()))),
    };

    let channel = event.channel_id.to_string();
    let span = info_span!("slash_command", %command, %user_id);
    tokio::spawn(
        async move {
            for reply in parsed.execute(&app.orchestrator).await {
                app.orchestrator.outbound.send_text(&channel, &reply, None).await;
            }
        }
        .instrument(span),
    );

    Ok(ephemeral(format!("⏳ `{command} {text}`")))
}

fn ephemeral(text: impl Into<String>) -> SlackCommandEventResponse {
    SlackCommandEventResponse {
        content: SlackMessageContent {
            text: Some(text.into()),
            markdown_text: None,
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        },
        response_type: Some(SlackMessageResponseType::Ephemeral),
    }
}
