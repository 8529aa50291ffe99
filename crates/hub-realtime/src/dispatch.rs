//! Fan-out of server messages to one user, a role cohort, or everyone.
//!
//! A message is serialized once per call and the same `Arc<String>` is
//! enqueued on every recipient's connection. A failed enqueue is counted and
//! reported; it never stops delivery to the remaining recipients.

use std::sync::Arc;

use hub_core::{Audience, NotificationEvent, UserDirectory, UserId};
use metrics::counter;
use tracing::{debug, warn};

use crate::faults::FaultReporter;
use crate::metrics::HUB_DISPATCH_DROPS_TOTAL;
use crate::protocol::{ServerMessage, encode};
use crate::registry::{ConnectedSession, ConnectionRegistry};

/// Per-call delivery tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Enqueued on a live connection.
    pub delivered: usize,
    /// Addressed but not registered.
    pub unreachable: usize,
    /// Registered but the enqueue failed (queue full or closed).
    pub failed: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: Delivery) {
        match outcome {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Unreachable => self.unreachable += 1,
            Delivery::Failed => self.failed += 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Unreachable,
    Failed,
}

/// Routes messages through the registry.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn UserDirectory>,
    faults: FaultReporter,
}

impl Dispatcher {
    /// Create a dispatcher resolving roles through `directory`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<dyn UserDirectory>,
        faults: FaultReporter,
    ) -> Self {
        Self {
            registry,
            directory,
            faults,
        }
    }

    /// Deliver to one user. `false` when the user is not connected or the
    /// enqueue failed; absence is not an error.
    pub fn send_to_user(&self, user_id: &UserId, message: &ServerMessage) -> bool {
        let Some(payload) = self.encode(message) else {
            return false;
        };
        self.send_encoded(user_id, &payload) == Delivery::Delivered
    }

    /// Deliver to every connected active member of `role`.
    ///
    /// A directory failure is reported as a fault and yields an empty report.
    pub async fn send_to_role(&self, role: &str, message: &ServerMessage) -> DispatchReport {
        let mut report = DispatchReport::default();
        let members = match self.directory.list_active_users_by_role(role).await {
            Ok(members) => members,
            Err(e) => {
                self.faults
                    .report("send_to_role", None, format!("role {role}: {e}"));
                return report;
            }
        };
        let Some(payload) = self.encode(message) else {
            return report;
        };
        for member in &members {
            report.record(self.send_encoded(member, &payload));
        }
        debug!(
            role,
            kind = message.kind(),
            members = members.len(),
            delivered = report.delivered,
            "role fan-out"
        );
        report
    }

    /// Deliver to every registered session.
    pub fn broadcast(&self, message: &ServerMessage) -> DispatchReport {
        self.broadcast_filtered(message, |_| true)
    }

    /// Deliver to every registered session except `excluded`'s.
    pub fn broadcast_except(&self, excluded: &UserId, message: &ServerMessage) -> DispatchReport {
        self.broadcast_filtered(message, |s| &s.user_id != excluded)
    }

    /// Deliver a notification to whatever audience its target fields name.
    pub async fn route(&self, event: &NotificationEvent) -> DispatchReport {
        let message = ServerMessage::NotificationReceive(event.clone());
        match event.audience() {
            Audience::User(user_id) => {
                let mut report = DispatchReport::default();
                if let Some(payload) = self.encode(&message) {
                    report.record(self.send_encoded(&user_id, &payload));
                }
                report
            }
            Audience::Role(role) => self.send_to_role(&role, &message).await,
            Audience::Everyone => self.broadcast(&message),
        }
    }

    fn broadcast_filtered(
        &self,
        message: &ServerMessage,
        include: impl Fn(&ConnectedSession) -> bool,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(payload) = self.encode(message) else {
            return report;
        };
        let recipients: Vec<_> = self.registry.snapshot().into_iter().filter(|s| include(s)).collect();
        for session in &recipients {
            report.record(self.deliver(session, &payload));
        }
        debug!(
            kind = message.kind(),
            recipients = recipients.len(),
            delivered = report.delivered,
            "broadcast"
        );
        report
    }

    fn send_encoded(&self, user_id: &UserId, payload: &Arc<String>) -> Delivery {
        match self.registry.lookup(user_id) {
            Some(session) => self.deliver(&session, payload),
            None => Delivery::Unreachable,
        }
    }

    fn deliver(&self, session: &ConnectedSession, payload: &Arc<String>) -> Delivery {
        if session.connection.send(payload.clone()) {
            return Delivery::Delivered;
        }
        counter!(HUB_DISPATCH_DROPS_TOTAL).increment(1);
        warn!(
            user_id = %session.user_id,
            conn_id = %session.handle,
            dropped = session.connection.drop_count(),
            "failed to enqueue message (queue full or closed)"
        );
        self.faults.report(
            "deliver",
            Some(&session.user_id),
            "outbound queue full or closed",
        );
        Delivery::Failed
    }

    fn encode(&self, message: &ServerMessage) -> Option<Arc<String>> {
        match encode(message, self.registry.now()) {
            Ok(payload) => Some(payload),
            Err(e) => {
                self.faults
                    .report("encode", None, format!("{}: {e}", message.kind()));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ClientConnection;
    use async_trait::async_trait;
    use hub_core::{
        CollaboratorError, DisplayIdentity, ManualClock, NotificationKind, SessionHandle,
        memory::MemoryDirectory,
    };
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        directory: Arc<MemoryDirectory>,
        dispatcher: Dispatcher,
        faults: FaultReporter,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(ConnectionRegistry::new(clock.clone()));
        let directory = Arc::new(MemoryDirectory::new());
        let faults = FaultReporter::new(clock);
        let dispatcher = Dispatcher::new(registry.clone(), directory.clone(), faults.clone());
        Harness {
            registry,
            directory,
            dispatcher,
            faults,
        }
    }

    fn connect(registry: &ConnectionRegistry, user: &str, capacity: usize) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = SessionHandle::generate();
        let _ = registry.admit(
            UserId::from(user),
            handle.clone(),
            DisplayIdentity::default(),
            Arc::new(ClientConnection::new(handle, tx)),
        );
        rx
    }

    fn member(role: &str) -> DisplayIdentity {
        DisplayIdentity {
            role_name: role.into(),
            ..DisplayIdentity::default()
        }
    }

    fn event(target_user: Option<&str>, target_role: Option<&str>) -> NotificationEvent {
        NotificationEvent {
            id: "n1".into(),
            title: "Export finished".into(),
            message: "Your CSV is ready".into(),
            kind: NotificationKind::Success,
            target_user_id: target_user.map(UserId::from),
            target_role_id: target_role.map(str::to_owned),
            timestamp: chrono::Utc::now(),
        }
    }

    fn message_type(raw: &str) -> String {
        let v: serde_json::Value = serde_json::from_str(raw).unwrap();
        v["type"].as_str().unwrap().to_owned()
    }

    #[test]
    fn send_to_user_delivers_exactly_once() {
        let h = harness();
        let mut rx = connect(&h.registry, "alice", 4);
        assert!(h.dispatcher.send_to_user(&"alice".into(), &ServerMessage::UnreadCount { count: 2 }));
        assert_eq!(message_type(&rx.try_recv().unwrap()), "unread_notification_count");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_to_absent_user_is_silent() {
        let h = harness();
        let mut faults = h.faults.subscribe();
        assert!(!h.dispatcher.send_to_user(&"ghost".into(), &ServerMessage::UnreadCount { count: 0 }));
        assert!(faults.try_recv().is_err());
    }

    #[tokio::test]
    async fn role_fan_out_reaches_connected_members_only() {
        let h = harness();
        for user in ["a", "b", "c"] {
            h.directory.add_user(user, member("analyst"), true);
        }
        h.directory.add_user("z", member("admin"), true);
        let mut rx_a = connect(&h.registry, "a", 4);
        let mut rx_b = connect(&h.registry, "b", 4);
        let mut rx_z = connect(&h.registry, "z", 4);

        let report = h.dispatcher.route(&event(None, Some("analyst"))).await;

        assert_eq!(report, DispatchReport { delivered: 2, unreachable: 1, failed: 0 });
        assert_eq!(message_type(&rx_a.try_recv().unwrap()), "notification:receive");
        assert_eq!(message_type(&rx_b.try_recv().unwrap()), "notification:receive");
        assert!(rx_z.try_recv().is_err());
    }

    #[tokio::test]
    async fn directory_failure_reports_fault() {
        struct Broken;
        #[async_trait]
        impl UserDirectory for Broken {
            async fn list_active_users_by_role(&self, _: &str) -> Result<Vec<UserId>, CollaboratorError> {
                Err(CollaboratorError::unavailable("user-directory", "timeout"))
            }
        }

        let h = harness();
        let dispatcher = Dispatcher::new(h.registry.clone(), Arc::new(Broken), h.faults.clone());
        let mut faults = h.faults.subscribe();
        let _rx = connect(&h.registry, "a", 4);

        let report = dispatcher.send_to_role("analyst", &ServerMessage::UnreadCount { count: 1 }).await;
        assert_eq!(report, DispatchReport::default());
        assert_eq!(faults.try_recv().unwrap().operation, "send_to_role");
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_removed() {
        let h = harness();
        let mut rx_a = connect(&h.registry, "a", 4);
        let mut rx_b = connect(&h.registry, "b", 4);
        let _ = h.registry.remove(&"b".into());

        let report = h.dispatcher.route(&event(None, None)).await;
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_target_takes_precedence() {
        let h = harness();
        h.directory.add_user("a", member("analyst"), true);
        let mut rx_a = connect(&h.registry, "a", 4);
        let mut rx_b = connect(&h.registry, "b", 4);

        let report = h.dispatcher.route(&event(Some("b"), Some("analyst"))).await;
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn broadcast_except_skips_one_user() {
        let h = harness();
        let mut rx_a = connect(&h.registry, "a", 4);
        let mut rx_b = connect(&h.registry, "b", 4);
        let report = h.dispatcher.broadcast_except(
            &"a".into(),
            &ServerMessage::UserStatus {
                user_id: "a".into(),
                status: hub_core::PresenceStatus::Online,
                last_activity: None,
            },
        );
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(message_type(&rx_b.try_recv().unwrap()), "user:status");
    }

    #[test]
    fn full_queue_does_not_stop_fan_out() {
        let h = harness();
        let _rx_full = connect(&h.registry, "slow", 1);
        let mut rx_ok = connect(&h.registry, "fast", 8);
        let mut faults = h.faults.subscribe();

        let first = h.dispatcher.broadcast(&ServerMessage::UnreadCount { count: 1 });
        let second = h.dispatcher.broadcast(&ServerMessage::UnreadCount { count: 2 });

        assert_eq!(first.delivered, 2);
        assert_eq!(second, DispatchReport { delivered: 1, unreachable: 0, failed: 1 });
        assert!(rx_ok.try_recv().is_ok());
        assert!(rx_ok.try_recv().is_ok());
        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.operation, "deliver");
        assert_eq!(fault.user_id, Some(UserId::from("slow")));
    }

    #[test]
    fn recipients_share_one_serialization() {
        let h = harness();
        let mut rx_a = connect(&h.registry, "a", 4);
        let mut rx_b = connect(&h.registry, "b", 4);
        let _ = h.dispatcher.broadcast(&ServerMessage::UnreadCount { count: 5 });
        let a = rx_a.try_recv().unwrap();
        let b = rx_b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
