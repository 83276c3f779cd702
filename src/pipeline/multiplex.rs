// Stream multiplexer: one subscription per hashtag, merged into one channel.
//
// With a single tag the control loop reads that subscription directly.
// With several, each subscription gets a forwarding task that relays its
// events into a shared merged channel and reports on a shared done channel
// when its listener has finished. The control loop forwards published
// statuses downstream and ends once every subscription is done.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use super::traits::{StreamError, StreamEvent, Subscription, Upstream};
use crate::mastodon::models::Status;

/// Default capacity of the merged event channel.
pub const DEFAULT_BUFFER: usize = 10;

/// Counters for one multiplexer run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexStats {
    /// Statuses handed to the output channel
    pub forwarded: u64,
    /// Notifications, deletions and unknown events
    pub discarded: u64,
    /// Error events seen on any subscription
    pub errors: u64,
}

/// Configured but not yet started multiplexer.
pub struct Multiplexer {
    tags: Vec<String>,
    buffer: usize,
    span: Span,
}

/// A running multiplexer.
pub struct MultiplexHandle {
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<MultiplexStats>,
}

impl MultiplexHandle {
    /// Ask every subscription to stop. The control loop closes the output
    /// channel once all of them have finished.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the control loop to finish.
    pub async fn join(self) -> Result<MultiplexStats> {
        self.task.await.context("Multiplexer task failed")
    }
}

impl Multiplexer {
    pub fn new(tags: Vec<String>, span: Span) -> Self {
        Self {
            tags,
            buffer: DEFAULT_BUFFER,
            span,
        }
    }

    /// Set the merged channel capacity (minimum 1).
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Open every subscription and start the control loop.
    ///
    /// Fails on an empty tag list or when any subscription cannot be opened.
    /// In the latter case every subscription opened so far is told to stop
    /// and the first error is returned.
    pub async fn start(
        self,
        upstream: Arc<dyn Upstream>,
        out: mpsc::Sender<Status>,
    ) -> Result<MultiplexHandle> {
        if self.tags.is_empty() {
            anyhow::bail!("Tag list cannot be empty");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop_tx);

        let task = if let [tag] = self.tags.as_slice() {
            info!(parent: &self.span, tag = %tag, "Subscribing to tag");
            let Subscription { events, done, .. } = upstream
                .subscribe(tag, stop_rx)
                .await
                .with_context(|| format!("Failed to subscribe to #{tag}"))?;

            let completion = async move {
                let _ = done.await;
            };
            tokio::spawn(
                control_loop(events, completion, out, Arc::clone(&stop)).instrument(self.span),
            )
        } else {
            let (merged_tx, merged_rx) = mpsc::channel(self.buffer);
            let (done_tx, mut done_rx) = mpsc::channel::<String>(self.tags.len());

            for (i, tag) in self.tags.iter().enumerate() {
                info!(parent: &self.span, tag = %tag, "Launching listener for tag");
                match upstream.subscribe(tag, stop_rx.clone()).await {
                    Ok(sub) => {
                        let span = tracing::debug_span!(parent: &self.span, "forward", tag = %tag);
                        tokio::spawn(
                            forward(sub, merged_tx.clone(), done_tx.clone()).instrument(span),
                        );
                    }
                    Err(e) => {
                        if i > 0 {
                            let _ = stop.send(true);
                        }
                        return Err(e.context(format!("Failed to subscribe to #{tag}")));
                    }
                }
            }
            drop(merged_tx);
            drop(done_tx);

            let expected = self.tags.len();
            let completion = async move {
                let mut finished = 0;
                while finished < expected {
                    match done_rx.recv().await {
                        Some(tag) => {
                            finished += 1;
                            debug!(tag = %tag, remaining = expected - finished, "Subscription finished");
                        }
                        None => break,
                    }
                }
            };
            tokio::spawn(
                control_loop(merged_rx, completion, out, Arc::clone(&stop)).instrument(self.span),
            )
        };

        Ok(MultiplexHandle { stop, task })
    }
}

/// Relay one subscription's events into the merged channel until its
/// listener finishes, then report on `done`.
async fn forward(
    mut sub: Subscription,
    merged: mpsc::Sender<StreamEvent>,
    done: mpsc::Sender<String>,
) {
    loop {
        tokio::select! {
            biased;
            event = sub.events.recv() => match event {
                Some(event) => {
                    if merged.send(event).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = (&mut sub.done).await;
                    break;
                }
            },
            _ = &mut sub.done => break,
        }
    }
    let _ = done.send(sub.tag).await;
}

/// Forward published statuses until `completion` resolves.
///
/// Buffered events are drained before completion is honoured. On exit the
/// stop signal goes out first, then the event channel is closed, then the
/// output sender is dropped.
async fn control_loop<F>(
    mut events: mpsc::Receiver<StreamEvent>,
    completion: F,
    out: mpsc::Sender<Status>,
    stop: Arc<watch::Sender<bool>>,
) -> MultiplexStats
where
    F: Future<Output = ()>,
{
    tokio::pin!(completion);
    let mut stats = MultiplexStats::default();

    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => {
                    if !dispatch(event, &out, &mut stats).await {
                        info!("Output channel closed, stopping subscriptions");
                        break;
                    }
                }
                None => {
                    (&mut completion).await;
                    break;
                }
            },
            _ = &mut completion => break,
        }
    }

    let _ = stop.send(true);
    events.close();
    drop(events);
    drop(out);

    info!(
        forwarded = stats.forwarded,
        discarded = stats.discarded,
        errors = stats.errors,
        "Multiplexer finished"
    );
    stats
}

/// Route one event. Returns false once the output channel is gone.
async fn dispatch(event: StreamEvent, out: &mpsc::Sender<Status>, stats: &mut MultiplexStats) -> bool {
    match event {
        StreamEvent::Update(status) => {
            debug!(id = %status.id, acct = %status.account.acct, "Status received");
            if out.send(*status).await.is_err() {
                return false;
            }
            stats.forwarded += 1;
        }
        StreamEvent::Notification | StreamEvent::Delete(_) => stats.discarded += 1,
        StreamEvent::Error(cause) => {
            stats.errors += 1;
            match cause {
                Some(StreamError::UnexpectedEof) => {
                    warn!("The stream connection was unexpectedly closed")
                }
                Some(cause) => warn!(error = %cause, "Error event"),
                None => warn!("Error event without a cause"),
            }
        }
        StreamEvent::Closed => debug!("Stream closed"),
        StreamEvent::Unknown(name) => {
            stats.discarded += 1;
            debug!(event = %name, "Unhandled event");
        }
    }
    true
}
