// Upstream trait: what the relay pipeline needs from the origin network.
//
// The real implementation is MastodonClient. Tests plug in in-memory fakes,
// which is why subscriptions are plain channel ends rather than anything
// tied to HTTP.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use crate::mastodon::models::{Account, Context, Relationship, Status};

/// Cause attached to a stream error event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The connection ended without us asking it to
    UnexpectedEof,
    /// Reading the response body failed
    Transport(String),
    /// An event payload could not be decoded
    Decode(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::UnexpectedEof => f.write_str("stream connection was unexpectedly closed"),
            StreamError::Transport(msg) => write!(f, "transport error: {msg}"),
            StreamError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for StreamError {}

/// One event from a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A status was published
    Update(Box<Status>),
    Notification,
    /// A status was deleted (carries its id)
    Delete(String),
    Error(Option<StreamError>),
    /// The listener is shutting down
    Closed,
    /// An event name the decoder does not know
    Unknown(String),
}

/// A live subscription to one topic.
///
/// `events` yields everything the listener decodes. `done` resolves once the
/// listener has finished, whether its sender fires or is dropped.
pub struct Subscription {
    pub tag: String,
    pub events: mpsc::Receiver<StreamEvent>,
    pub done: oneshot::Receiver<()>,
}

impl Subscription {
    pub fn new(
        tag: impl Into<String>,
        events: mpsc::Receiver<StreamEvent>,
        done: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            tag: tag.into(),
            events,
            done,
        }
    }
}

/// The origin network, seen from the pipeline.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Open a live subscription for a hashtag.
    ///
    /// Returns once the subscription is established. The listener must stop
    /// and resolve `done` after `stop` flips to `true`.
    async fn subscribe(&self, tag: &str, stop: watch::Receiver<bool>) -> Result<Subscription>;

    /// Fetch the thread context (ancestors and descendants) of a status.
    async fn status_context(&self, status_id: &str) -> Result<Context>;

    /// Fetch our relationship with another account.
    async fn relationship(&self, account_id: &str) -> Result<Relationship>;

    /// The account the pipeline is running as.
    async fn current_account(&self) -> Result<Account>;
}
