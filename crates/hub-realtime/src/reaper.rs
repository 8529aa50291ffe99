//! Periodic eviction of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::RealtimeHub;
use crate::registry::is_idle;

/// One pass over the registry. Returns how many sessions were evicted.
///
/// Candidates come from a snapshot; the hub re-checks generation and idle
/// time under the registry lock, so a session admitted or touched after the
/// snapshot survives.
pub fn sweep(hub: &RealtimeHub) -> usize {
    let now = hub.clock().now();
    let threshold = hub.config().idle_timeout;
    let evicted = hub
        .registry()
        .snapshot()
        .into_iter()
        .filter(|s| is_idle(s.last_activity, threshold, now))
        .filter(|s| hub.evict_idle(&s.user_id, s.generation))
        .count();
    if evicted > 0 {
        info!(evicted, remaining = hub.registry().len(), "reaper sweep");
    } else {
        debug!(remaining = hub.registry().len(), "reaper sweep, nothing idle");
    }
    evicted
}

/// Sweep every `interval` until `cancel` fires.
pub async fn run_reaper(hub: Arc<RealtimeHub>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("reaper stopped");
                break;
            }
            _ = ticker.tick() => {
                let _ = sweep(&hub);
            }
        }
    }
}
