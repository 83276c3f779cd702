// Mastodon streaming API: Server-Sent Events decoding and the listener task.
//
// The hashtag stream is a long-lived `text/event-stream` response. Each
// message is an `event:` line naming the kind, one or more `data:` lines
// with the payload, and a blank line. Lines starting with `:` are
// heartbeats. Network chunks may split a message (or a UTF-8 sequence)
// anywhere, so the decoder buffers raw bytes until it sees a newline.

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::models::Status;
use crate::pipeline::traits::{StreamError, StreamEvent};

/// A complete SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

/// Longest line the decoder will buffer. Status payloads sit well below this.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    /// Skipping the rest of an overlong line
    discarding: bool,
    overflows: usize,
}

impl SseDecoder {
    /// Feed a chunk of the response body, returning every message it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.pending.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(msg) = self.process_line(line) {
                messages.push(msg);
            }
        }

        if self.pending.len() > MAX_LINE_BYTES {
            if !self.discarding {
                self.overflows += 1;
                self.event = None;
                self.data.clear();
            }
            self.pending.clear();
            self.discarding = true;
        }

        messages
    }

    /// How many overlong lines were dropped since the last call.
    pub fn take_overflows(&mut self) -> usize {
        std::mem::take(&mut self.overflows)
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Map an SSE message onto a pipeline stream event.
pub fn to_stream_event(msg: SseMessage) -> StreamEvent {
    match msg.event.as_str() {
        "update" => match serde_json::from_str::<Status>(&msg.data) {
            Ok(status) => StreamEvent::Update(Box::new(status)),
            Err(e) => StreamEvent::Error(Some(StreamError::Decode(e.to_string()))),
        },
        "notification" => StreamEvent::Notification,
        "delete" => StreamEvent::Delete(msg.data.trim().to_string()),
        other => StreamEvent::Unknown(other.to_string()),
    }
}

/// Read an opened streaming response until it ends or `stop` is set.
///
/// Always finishes by sending `Closed` (if anyone is still listening) and
/// resolving `done`.
pub(crate) async fn listen(
    tag: String,
    response: reqwest::Response,
    events: mpsc::Sender<StreamEvent>,
    mut stop: watch::Receiver<bool>,
    done: oneshot::Sender<()>,
) {
    let body = response.bytes_stream();
    tokio::pin!(body);
    let mut decoder = SseDecoder::default();

    'read: loop {
        if *stop.borrow_and_update() {
            debug!(tag = %tag, "Stop requested, closing stream");
            break;
        }

        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    // Every stop sender is gone, nobody can stop us anymore
                    debug!(tag = %tag, "Stop channel closed, closing stream");
                    break;
                }
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for msg in decoder.feed(&bytes) {
                        if events.send(to_stream_event(msg)).await.is_err() {
                            break 'read;
                        }
                    }
                    for _ in 0..decoder.take_overflows() {
                        let cause =
                            StreamError::Decode(format!("line longer than {MAX_LINE_BYTES} bytes"));
                        if events.send(StreamEvent::Error(Some(cause))).await.is_err() {
                            break 'read;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(tag = %tag, error = %e, "Stream read failed");
                    let _ = events
                        .send(StreamEvent::Error(Some(StreamError::Transport(e.to_string()))))
                        .await;
                    break;
                }
                None => {
                    let _ = events
                        .send(StreamEvent::Error(Some(StreamError::UnexpectedEof)))
                        .await;
                    break;
                }
            }
        }
    }

    let _ = events.send(StreamEvent::Closed).await;
    let _ = done.send(());
    debug!(tag = %tag, "Stream listener finished");
}
