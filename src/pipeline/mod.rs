// Relay pipeline: stream multiplexer -> status filter -> sink.
//
// `start` wires the two stages together with bounded channels and hands
// back the receiving end for whichever sink the caller runs.

pub mod filter;
pub mod multiplex;
pub mod traits;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::mastodon::models::Status;
use filter::{FilterConfig, FilterEngine, FilterStats};
use multiplex::{MultiplexHandle, MultiplexStats, Multiplexer};
use traits::Upstream;

/// Both running stages of a pipeline.
pub struct PipelineHandle {
    multiplexer: MultiplexHandle,
    filter: JoinHandle<FilterStats>,
}

impl PipelineHandle {
    /// Stop all subscriptions. The stages drain and close their outputs in turn.
    pub fn shutdown(&self) {
        self.multiplexer.shutdown();
    }

    /// Wait for both stages to finish.
    pub async fn join(self) -> Result<(MultiplexStats, FilterStats)> {
        let multiplex_stats = self.multiplexer.join().await?;
        let filter_stats = self.filter.await.context("Filter task failed")?;
        Ok((multiplex_stats, filter_stats))
    }
}

/// Subscribe to `tags`, start filtering, and return the accepted-status receiver.
///
/// Our own account is resolved here, once, before any subscription opens.
pub async fn start(
    upstream: Arc<dyn Upstream>,
    tags: Vec<String>,
    config: FilterConfig,
    capacity: usize,
) -> Result<(PipelineHandle, mpsc::Receiver<Status>)> {
    let own_account = upstream
        .current_account()
        .await
        .context("Failed to resolve our own account")?;
    tracing::info!(id = %own_account.id, acct = %own_account.acct, "Running as");

    let capacity = capacity.max(1);
    let (merged_tx, merged_rx) = mpsc::channel(capacity);
    let (accepted_tx, accepted_rx) = mpsc::channel(capacity);

    let multiplexer = Multiplexer::new(tags, tracing::info_span!("multiplex"))
        .with_buffer(capacity)
        .start(Arc::clone(&upstream), merged_tx)
        .await?;

    let engine = FilterEngine::new(upstream, config, own_account.id, tracing::info_span!("filter"));
    let filter = tokio::spawn(engine.run(merged_rx, accepted_tx));

    Ok((
        PipelineHandle {
            multiplexer,
            filter,
        },
        accepted_rx,
    ))
}
