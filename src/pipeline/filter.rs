// Status filter: decides which streamed statuses get relayed.
//
// Checks run in a fixed order and stop at the first rejection:
//   1. flags (muted, sensitive, reblog)
//   2. visibility
//   3. already relayed this run
//   4. posted by our own account
//   5. reply to a thread we already boosted (network, fail-open)
//   6. carries one of the required tags
//   7. author is followed and not blocked (network, fail-closed)
// Local checks come before network ones so duplicates and obvious misses
// never cost a round trip.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument, Span};

use super::traits::Upstream;
use crate::mastodon::models::{Status, Visibility};

/// Which statuses are eligible for relaying.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// An empty set rejects everything
    pub visibility: HashSet<Visibility>,
    /// Exact, case-sensitive tag names; an empty set rejects everything
    pub required_tags: HashSet<String>,
    pub require_unmuted: bool,
    pub require_original: bool,
    pub require_followed_by_us: bool,
    pub forbid_sensitive: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            visibility: HashSet::from([Visibility::Public]),
            required_tags: HashSet::new(),
            require_unmuted: true,
            require_original: true,
            require_followed_by_us: false,
            forbid_sensitive: false,
        }
    }
}

/// Why a status was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Flags,
    Visibility,
    AlreadySeen,
    OwnStatus,
    ThreadAlreadyBoosted,
    NoMatchingTag,
    NotFollowed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::Flags => "flags",
            RejectReason::Visibility => "visibility",
            RejectReason::AlreadySeen => "already_seen",
            RejectReason::OwnStatus => "own_status",
            RejectReason::ThreadAlreadyBoosted => "thread_already_boosted",
            RejectReason::NoMatchingTag => "no_matching_tag",
            RejectReason::NotFollowed => "not_followed",
        };
        f.write_str(s)
    }
}

/// Outcome of running the filter chain on one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Forward,
    Drop(RejectReason),
}

/// Ids of statuses relayed during this run.
#[derive(Debug, Default)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Counters for one filter run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterStats {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: HashMap<RejectReason, u64>,
}

impl FilterStats {
    pub fn dropped_for(&self, reason: RejectReason) -> u64 {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    fn record(&mut self, decision: Decision) {
        self.received += 1;
        match decision {
            Decision::Forward => self.forwarded += 1,
            Decision::Drop(reason) => *self.dropped.entry(reason).or_default() += 1,
        }
    }
}

/// Flag check: muted, sensitive and reblog policy switches.
pub fn passes_flags(status: &Status, config: &FilterConfig) -> bool {
    !(status.is_muted() && config.require_unmuted)
        && !(status.sensitive && config.forbid_sensitive)
        && !(config.require_original && (status.is_reblogged() || status.is_reblog()))
}

pub fn passes_visibility(status: &Status, config: &FilterConfig) -> bool {
    config.visibility.contains(&status.visibility)
}

/// True if any of the status's tags is in the required set.
pub fn passes_tags(status: &Status, config: &FilterConfig) -> bool {
    status
        .tag_names()
        .any(|name| config.required_tags.contains(name))
}

/// The stateful filter stage.
pub struct FilterEngine {
    upstream: Arc<dyn Upstream>,
    config: FilterConfig,
    own_account_id: String,
    seen: SeenSet,
    span: Span,
}

impl FilterEngine {
    /// `own_account_id` is the account the relay runs as, resolved once at startup.
    pub fn new(
        upstream: Arc<dyn Upstream>,
        config: FilterConfig,
        own_account_id: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            upstream,
            config,
            own_account_id: own_account_id.into(),
            seen: SeenSet::default(),
            span,
        }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Run the filter chain on one status. A forwarded status is recorded
    /// in the seen set before this returns.
    pub async fn evaluate(&mut self, status: &Status) -> Decision {
        if !passes_flags(status, &self.config) {
            return Decision::Drop(RejectReason::Flags);
        }
        if !passes_visibility(status, &self.config) {
            return Decision::Drop(RejectReason::Visibility);
        }
        if self.seen.contains(&status.id) {
            // Probably arrived through more than one of our tags
            return Decision::Drop(RejectReason::AlreadySeen);
        }
        if status.account.id == self.own_account_id {
            return Decision::Drop(RejectReason::OwnStatus);
        }
        if status.is_reply() && self.thread_already_boosted(status).await {
            return Decision::Drop(RejectReason::ThreadAlreadyBoosted);
        }
        if !passes_tags(status, &self.config) {
            return Decision::Drop(RejectReason::NoMatchingTag);
        }
        if self.config.require_followed_by_us && !self.followed_by_us(status).await {
            return Decision::Drop(RejectReason::NotFollowed);
        }

        self.seen.insert(&status.id);
        Decision::Forward
    }

    /// Fail-open: a context fetch error counts as "not boosted".
    async fn thread_already_boosted(&self, status: &Status) -> bool {
        match self.upstream.status_context(&status.id).await {
            Ok(context) => context.ancestors.iter().any(|a| a.is_reblogged()),
            Err(e) => {
                warn!(id = %status.id, error = %e, "Ancestor lookup failed, letting reply through");
                false
            }
        }
    }

    /// Fail-closed: a relationship lookup error counts as "not followed".
    async fn followed_by_us(&self, status: &Status) -> bool {
        match self.upstream.relationship(&status.account.id).await {
            Ok(rel) => rel.following && !rel.blocking,
            Err(e) => {
                warn!(account = %status.account.id, error = %e, "Follow check failed");
                false
            }
        }
    }

    /// Filter every status from `input` into `output`, one at a time,
    /// preserving arrival order. Returns when `input` is exhausted or the
    /// sink has gone away; `output` is closed on return.
    pub async fn run(self, input: mpsc::Receiver<Status>, output: mpsc::Sender<Status>) -> FilterStats {
        let span = self.span.clone();
        self.run_inner(input, output).instrument(span).await
    }

    async fn run_inner(
        mut self,
        mut input: mpsc::Receiver<Status>,
        output: mpsc::Sender<Status>,
    ) -> FilterStats {
        let mut stats = FilterStats::default();

        while let Some(status) = input.recv().await {
            let decision = self.evaluate(&status).await;
            stats.record(decision);

            match decision {
                Decision::Forward => {
                    debug!(id = %status.id, acct = %status.account.acct, "Status accepted");
                    if output.send(status).await.is_err() {
                        warn!("Sink closed, stopping filter");
                        break;
                    }
                }
                Decision::Drop(reason) => {
                    debug!(id = %status.id, reason = %reason, "Status dropped");
                }
            }
        }

        info!(
            received = stats.received,
            forwarded = stats.forwarded,
            dropped = ?stats.dropped,
            seen = self.seen.len(),
            "Filter finished"
        );
        stats
    }
}
