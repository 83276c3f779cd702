// Request pacing for Mastodon REST calls.
//
// Mastodon's default limit is 300 requests per 5 minutes per token, i.e.
// one per second on average. Every REST call waits for its slot here; the
// streaming connections are long-lived and don't count.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Longest gap the limiter will impose, however low the rate.
const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Enforces a minimum interval between requests. Cheap to clone; clones
/// share the same schedule.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Schedule>>,
}

struct Schedule {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl RateLimiter {
    /// Allow `requests_per_second` requests per second. Non-positive or
    /// non-finite rates disable pacing; tiny rates are capped at one request
    /// per `MAX_INTERVAL`.
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / requests_per_second)
                .unwrap_or(MAX_INTERVAL)
                .min(MAX_INTERVAL)
        } else {
            Duration::ZERO
        };
        Self {
            inner: Arc::new(Mutex::new(Schedule {
                interval,
                next_slot: None,
            })),
        }
    }

    /// Wait for the next request slot.
    ///
    /// Slots are reserved under the lock and slept for outside it, so
    /// concurrent callers queue up one interval apart.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut schedule = self.inner.lock().await;
            let now = Instant::now();
            let slot = match schedule.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            schedule.next_slot = Some(slot + schedule.interval);
            slot
        };

        tokio::time::sleep_until(wait_until).await;
    }
}
