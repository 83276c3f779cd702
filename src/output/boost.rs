// Boost sink: reblog each relayed status as our own account.
//
// Delivery is best effort. A failed reblog is logged and the next status
// is handled as usual; nothing is retried.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::mastodon::client::MastodonClient;
use crate::mastodon::models::Status;

/// Counters for one boost run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BoostStats {
    pub boosted: u64,
    pub failed: u64,
}

/// Reblog statuses until the channel closes.
pub async fn run(client: &MastodonClient, mut statuses: mpsc::Receiver<Status>) -> BoostStats {
    let mut stats = BoostStats::default();

    while let Some(status) = statuses.recv().await {
        info!(
            id = %status.id,
            acct = %status.account.acct,
            "Boosting status"
        );
        match client.reblog(&status.id).await {
            Ok(_) => stats.boosted += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(id = %status.id, error = %e, "Boost failed");
            }
        }
    }

    stats
}
