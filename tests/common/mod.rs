// In-memory Upstream used by the integration tests.
//
// Streams are scripted per tag: the listener sends its events, then either
// finishes straight away or waits for the stop signal. Context and
// relationship lookups answer from maps; a missing entry is an error.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use tagrelay::mastodon::models::{Account, Context, Relationship, Status, Tag, Visibility};
use tagrelay::pipeline::traits::{StreamEvent, Subscription, Upstream};

pub const OWN_ACCOUNT_ID: &str = "1000";

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Listener finishes as soon as its script is sent
    AfterScript,
    /// Listener waits for the stop signal after its script
    OnStop,
}

struct Script {
    events: Vec<StreamEvent>,
    ending: Ending,
}

pub struct FakeUpstream {
    own: Option<Account>,
    scripts: Mutex<HashMap<String, Script>>,
    failing: HashSet<String>,
    contexts: HashMap<String, Context>,
    relationships: HashMap<String, Relationship>,
    pub subscribed: Mutex<Vec<String>>,
    pub stopped: Arc<Mutex<Vec<String>>>,
    pub context_calls: AtomicUsize,
    pub relationship_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self {
            own: Some(account(OWN_ACCOUNT_ID, "relay")),
            scripts: Mutex::new(HashMap::new()),
            failing: HashSet::new(),
            contexts: HashMap::new(),
            relationships: HashMap::new(),
            subscribed: Mutex::new(Vec::new()),
            stopped: Arc::new(Mutex::new(Vec::new())),
            context_calls: AtomicUsize::new(0),
            relationship_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_stream(self, tag: &str, events: Vec<StreamEvent>, ending: Ending) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(tag.to_string(), Script { events, ending });
        self
    }

    pub fn failing(mut self, tag: &str) -> Self {
        self.failing.insert(tag.to_string());
        self
    }

    pub fn without_own_account(mut self) -> Self {
        self.own = None;
        self
    }

    pub fn with_context(mut self, status_id: &str, ancestors: Vec<Status>) -> Self {
        self.contexts.insert(
            status_id.to_string(),
            Context {
                ancestors,
                descendants: Vec::new(),
            },
        );
        self
    }

    pub fn with_relationship(mut self, account_id: &str, following: bool, blocking: bool) -> Self {
        self.relationships.insert(
            account_id.to_string(),
            Relationship {
                id: account_id.to_string(),
                following,
                blocking,
                ..Relationship::default()
            },
        );
        self
    }

    pub fn context_calls(&self) -> usize {
        self.context_calls.load(Ordering::SeqCst)
    }

    pub fn relationship_calls(&self) -> usize {
        self.relationship_calls.load(Ordering::SeqCst)
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }

    /// Wait (up to a second) until `tag`'s listener has observed the stop signal.
    pub async fn wait_stopped(&self, tag: &str) -> bool {
        for _ in 0..100 {
            if self.stopped.lock().unwrap().iter().any(|t| t == tag) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn subscribe(&self, tag: &str, mut stop: watch::Receiver<bool>) -> Result<Subscription> {
        self.subscribed.lock().unwrap().push(tag.to_string());
        if self.failing.contains(tag) {
            anyhow::bail!("connection refused for #{tag}");
        }

        let script = self.scripts.lock().unwrap().remove(tag).unwrap_or(Script {
            events: Vec::new(),
            ending: Ending::OnStop,
        });

        let (tx, rx) = mpsc::channel(16);
        let (done_tx, done_rx) = oneshot::channel();
        let stopped = Arc::clone(&self.stopped);
        let name = tag.to_string();

        tokio::spawn(async move {
            for event in script.events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            if script.ending == Ending::OnStop {
                while !*stop.borrow_and_update() {
                    if stop.changed().await.is_err() {
                        break;
                    }
                }
                stopped.lock().unwrap().push(name);
            }
            drop(tx);
            let _ = done_tx.send(());
        });

        Ok(Subscription::new(tag, rx, done_rx))
    }

    async fn status_context(&self, status_id: &str) -> Result<Context> {
        self.context_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .get(status_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("context lookup failed for {status_id}"))
    }

    async fn relationship(&self, account_id: &str) -> Result<Relationship> {
        self.relationship_calls.fetch_add(1, Ordering::SeqCst);
        self.relationships
            .get(account_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("relationship lookup failed for {account_id}"))
    }

    async fn current_account(&self) -> Result<Account> {
        self.own
            .clone()
            .ok_or_else(|| anyhow::anyhow!("verify_credentials returned 401"))
    }
}

pub fn account(id: &str, username: &str) -> Account {
    Account {
        id: id.to_string(),
        username: username.to_string(),
        acct: username.to_string(),
        display_name: String::new(),
        url: None,
    }
}

/// A public, original, unflagged status by account "42".
pub fn status(id: &str, tags: &[&str]) -> Status {
    Status {
        id: id.to_string(),
        account: account("42", "alice"),
        visibility: Visibility::Public,
        content: format!("<p>status {id}</p>"),
        spoiler_text: String::new(),
        tags: tags
            .iter()
            .map(|t| Tag {
                name: t.to_string(),
                url: None,
            })
            .collect(),
        media_attachments: Vec::new(),
        sensitive: false,
        muted: Some(false),
        reblogged: Some(false),
        reblog: None,
        in_reply_to_id: None,
        reblogs_count: 0,
        created_at: chrono::Utc::now(),
        url: None,
    }
}

pub fn update(status: Status) -> StreamEvent {
    StreamEvent::Update(Box::new(status))
}

/// Drain a receiver until it closes, with a timeout so a hang fails the test.
pub async fn collect(mut rx: mpsc::Receiver<Status>) -> Vec<Status> {
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(status)) => out.push(status),
            Ok(None) => return out,
            Err(_) => panic!("channel did not close in time"),
        }
    }
}
