//! Slack Web API and Socket Mode client.
//!
//! Outgoing messages go through a bounded queue drained by one worker task,
//! so relay readers never wait on Slack rate limits.

use std::sync::Arc;
use std::time::Duration;

use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackChannelId, SlackClient, SlackClientEventsListenerEnvironment,
    SlackClientHyperHttpsConnector, SlackClientSession, SlackClientSocketModeConfig,
    SlackClientSocketModeListener, SlackMessageContent, SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::outbound::{ChatSink, SendFuture};
use crate::slack::{commands, events, SlackState};
use crate::{config::SlackConfig, AppError, Result};

type Connector = SlackClientHyperHttpsConnector;

const QUEUE_CAPACITY: usize = 256;
const FIRST_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const MAX_SEND_ATTEMPTS: u32 = 6;

/// A queued `chat.postMessage`.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Target channel.
    pub channel: SlackChannelId,
    /// Message text (Slack markup).
    pub text: String,
    /// Parent message when replying in a thread.
    pub thread_ts: Option<SlackTs>,
}

impl OutgoingMessage {
    /// Message for `channel`, threaded under `thread_ts` when given.
    pub fn new(channel: &str, text: String, thread_ts: Option<&str>) -> Self {
        Self {
            channel: SlackChannelId(channel.to_owned()),
            text,
            thread_ts: thread_ts.map(|ts| SlackTs(ts.to_owned())),
        }
    }

    fn into_request(self) -> SlackApiChatPostMessageRequest {
        let content = SlackMessageContent {
            text: Some(self.text),
            markdown_text: None,
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        };
        SlackApiChatPostMessageRequest {
            channel: self.channel,
            content,
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: self.thread_ts,
            username: None,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        }
    }
}

fn api_token(value: &str, kind: SlackApiTokenType) -> SlackApiToken {
    SlackApiToken {
        token_value: SlackApiTokenValue(value.to_owned()),
        cookie: None,
        team_id: None,
        scope: None,
        token_type: Some(kind),
    }
}

/// Slack connection: HTTP client, tokens, and the outgoing queue.
pub struct SlackService {
    client: Arc<SlackClient<Connector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    outgoing: mpsc::Sender<OutgoingMessage>,
}

impl SlackService {
    /// Build the client and start the queue worker.
    ///
    /// Socket Mode needs the application state and is started afterwards
    /// with [`SlackService::spawn_socket_mode`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn start(config: &SlackConfig) -> Result<(Self, JoinHandle<()>)> {
        let connector = Connector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = api_token(&config.bot_token, SlackApiTokenType::Bot);
        let app_token = api_token(&config.app_token, SlackApiTokenType::App);

        let (outgoing, queue) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(drain_queue(Arc::clone(&client), bot_token.clone(), queue));
        info!(capacity = QUEUE_CAPACITY, "slack send queue started");

        Ok((
            Self {
                client,
                bot_token,
                app_token,
                outgoing,
            },
            worker,
        ))
    }

    /// Queue a message for delivery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` once the worker has stopped.
    pub async fn enqueue(&self, message: OutgoingMessage) -> Result<()> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| AppError::Slack("send queue is closed".into()))
    }

    /// The bot's user id, as it appears in `<@...>` mentions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if `auth.test` fails.
    pub async fn bot_user_id(&self) -> Result<String> {
        let identity = self
            .client
            .open_session(&self.bot_token)
            .auth_test()
            .await
            .map_err(|err| AppError::Slack(format!("auth.test failed: {err}")))?;
        Ok(identity.user_id.to_string())
    }

    /// Connect Socket Mode; slash commands and mentions are routed into `state`.
    #[must_use]
    pub fn spawn_socket_mode(&self, state: Arc<SlackState>) -> JoinHandle<()> {
        let environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode callback failed");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_command_events(commands::handle_command)
            .with_push_events(events::handle_push_event);
        let listener = SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            environment,
            callbacks,
        );

        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(err) = listener.listen_for(&app_token).await {
                error!(?err, "socket mode connection failed");
                return;
            }
            info!("socket mode connected");
            listener.serve().await;
            info!("socket mode listener exited");
        })
    }
}

async fn drain_queue(
    client: Arc<SlackClient<Connector>>,
    token: SlackApiToken,
    mut queue: mpsc::Receiver<OutgoingMessage>,
) {
    let session = client.open_session(&token);
    while let Some(message) = queue.recv().await {
        post_with_retry(&session, &message.into_request()).await;
    }
    info!("slack send queue closed");
}

/// Post one message, retrying with exponential backoff. Rate-limit replies
/// dictate their own delay. The message is dropped after the last attempt.
async fn post_with_retry(
    session: &SlackClientSession<'_, Connector>,
    request: &SlackApiChatPostMessageRequest,
) {
    let mut backoff = FIRST_BACKOFF;
    for attempt in 1..=MAX_SEND_ATTEMPTS {
        let err = match session.chat_post_message(request).await {
            Ok(_) => {
                debug!(channel = %request.channel, attempt, "slack message posted");
                return;
            }
            Err(err) => err,
        };
        if attempt == MAX_SEND_ATTEMPTS {
            error!(?err, channel = %request.channel, "giving up on slack message");
            return;
        }
        let delay = match &err {
            SlackClientError::RateLimitError(limited) => limited.retry_after.unwrap_or(backoff),
            _ => backoff,
        };
        warn!(?err, ?delay, attempt, "slack post failed, retrying");
        sleep(delay).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

impl ChatSink for SlackService {
    fn send<'a>(
        &'a self,
        channel: &'a str,
        text: String,
        reply_to: Option<&'a str>,
    ) -> SendFuture<'a> {
        Box::pin(self.enqueue(OutgoingMessage::new(channel, text, reply_to)))
    }
}
