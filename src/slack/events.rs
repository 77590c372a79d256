//! Slack push event dispatch: bot mentions become agent prompts.
//!
//! Only `app_mention` events are handled. Authors outside the allow-list are
//! dropped silently (logged as security events). Replies to the requester
//! are threaded under the mention.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackAppMentionEvent, SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackEventCallbackBody, SlackPushEventCallback,
};
use tracing::{debug, info_span, warn, Instrument};

use crate::attachments::Attachment;
use crate::commands::{handle_inbound, InboundMessage};
use crate::slack::{is_authorized, slack_state};

/// Handle push events delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; handling continues on a spawned task.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackEventCallbackBody::AppMention(mention) = event.event else {
        debug!("push event ignored");
        return Ok(());
    };

    let Some(app) = slack_state(&state).await else {
        warn!("slack state not available; cannot process mention");
        return Ok(());
    };
    if !is_authorized(&mention.user.to_string(), &app.orchestrator.config) {
        return Ok(());
    }

    let message = inbound_message(mention);
    let span = info_span!("mention", channel = %message.channel, user = %message.user);
    tokio::spawn(
        async move {
            let channel = message.channel.clone();
            let reply_to = message.message_id.clone();
            let replies =
                handle_inbound(&app.orchestrator, &app.mentions, &app.fetcher, message).await;
            for reply in replies {
                app.orchestrator
                    .outbound
                    .send_text(&channel, &reply, Some(&reply_to))
                    .await;
            }
        }
        .instrument(span),
    );
    Ok(())
}

fn inbound_message(event: SlackAppMentionEvent) -> InboundMessage {
    let attachments = event
        .content
        .files
        .unwrap_or_default()
        .into_iter()
        .filter_map(|file| {
            let url = file.url_private_download.or(file.url_private)?;
            Some(Attachment {
                id: file.id.to_string(),
                name: file.name.unwrap_or_default(),
                url: url.to_string(),
            })
        })
        .collect();
    let thread = event.origin.thread_ts.unwrap_or(event.origin.ts);

    InboundMessage {
        channel: event.channel.to_string(),
        user: event.user.to_string(),
        message_id: thread.to_string(),
        text: event.content.text.unwrap_or_default(),
        attachments,
    }
}
