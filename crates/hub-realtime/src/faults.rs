//! Structured fault channel.
//!
//! Per-operation failures (store errors, directory lookups, failed writes)
//! are never fatal to a session. They are logged, counted, and published on a
//! broadcast channel the host application can observe.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hub_core::{Clock, UserId};
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::metrics::HUB_FAULTS_TOTAL;

const CHANNEL_CAPACITY: usize = 256;

/// One reported failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fault {
    /// What was being attempted (e.g. `mark_read`, `send_to_role`).
    pub operation: &'static str,
    /// Affected user, when there is one.
    pub user_id: Option<UserId>,
    /// Human-readable cause.
    pub message: String,
    /// When it was reported.
    pub at: DateTime<Utc>,
}

/// Fan-out of [`Fault`]s to any number of observers. Cheap to clone.
#[derive(Clone)]
pub struct FaultReporter {
    tx: broadcast::Sender<Fault>,
    clock: Arc<dyn Clock>,
}

impl FaultReporter {
    /// Create a reporter stamping faults with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, clock }
    }

    /// Record a fault. Never blocks; with no subscribers the fault is only logged.
    pub fn report(&self, operation: &'static str, user_id: Option<&UserId>, message: impl Into<String>) {
        let fault = Fault {
            operation,
            user_id: user_id.cloned(),
            message: message.into(),
            at: self.clock.now(),
        };
        warn!(
            operation,
            user_id = fault.user_id.as_ref().map(UserId::as_str),
            message = %fault.message,
            "realtime fault"
        );
        counter!(HUB_FAULTS_TOTAL, "operation" => operation).increment(1);
        let _ = self.tx.send(fault);
    }

    /// Observe faults reported from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Fault> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::ManualClock;

    #[tokio::test]
    async fn subscribers_receive_faults() {
        let clock = ManualClock::default();
        let reporter = FaultReporter::new(Arc::new(clock.clone()));
        let mut rx = reporter.subscribe();

        reporter.report("mark_read", Some(&UserId::from("alice")), "store down");

        let fault = rx.recv().await.unwrap();
        assert_eq!(fault.operation, "mark_read");
        assert_eq!(fault.user_id, Some(UserId::from("alice")));
        assert_eq!(fault.message, "store down");
        assert_eq!(fault.at, clock.now());
    }

    #[test]
    fn report_without_subscribers_is_silent() {
        let reporter = FaultReporter::new(Arc::new(ManualClock::default()));
        reporter.report("broadcast", None, "nobody listening");
    }

    #[tokio::test]
    async fn clones_share_channel() {
        let reporter = FaultReporter::new(Arc::new(ManualClock::default()));
        let mut rx = reporter.subscribe();
        reporter.clone().report("send_to_role", None, "directory failed");
        assert_eq!(rx.recv().await.unwrap().operation, "send_to_role");
    }
}
