//! Outbound delivery: the chat sink contract and segmented notification sends.

pub mod segmenter;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use crate::models::session::NotificationTarget;
use crate::outbound::segmenter::{segment, SegmentPolicy};
use crate::relay::format::Notification;
use crate::Result;

/// Boxed future returned by [`ChatSink::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// "Send text to channel" as provided by the chat collaborator.
pub trait ChatSink: Send + Sync {
    /// Deliver one message, optionally as a reply to `reply_to`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) (or the sink's
    /// equivalent) when the message cannot be queued.
    fn send<'a>(
        &'a self,
        channel: &'a str,
        text: String,
        reply_to: Option<&'a str>,
    ) -> SendFuture<'a>;
}

/// Segments and delivers text through a [`ChatSink`].
#[derive(Clone)]
pub struct Outbound {
    sink: Arc<dyn ChatSink>,
    policy: SegmentPolicy,
}

impl Outbound {
    /// Wrap `sink` with a segmentation policy.
    #[must_use]
    pub fn new(sink: Arc<dyn ChatSink>, policy: SegmentPolicy) -> Self {
        Self { sink, policy }
    }

    /// Send `text` in segments. Delivery failures are logged, not returned.
    pub async fn send_text(&self, channel: &str, text: &str, reply_to: Option<&str>) {
        for chunk in segment(text, &self.policy) {
            if let Err(err) = self.sink.send(channel, chunk, reply_to).await {
                warn!(%err, channel, "failed to deliver chat message");
            }
        }
    }

    /// Render and deliver a relay notification to `target`.
    pub async fn notify(&self, target: &NotificationTarget, spawn_id: &str, note: &Notification) {
        let text = note.render(spawn_id, Some(&target.user));
        self.send_text(&target.channel, &text, target.reply_to.as_deref())
            .await;
    }
}
