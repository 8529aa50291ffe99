//! Per-session message handling.
//!
//! [`ProtocolHandler::handle_frame`] is everything that happens to one
//! inbound frame of a connected session: touch the registry, decode, act,
//! and return the replies to enqueue in order. No transport is involved, so
//! the whole protocol is testable with in-memory collaborators.

use std::sync::Arc;

use hub_core::{DisplayIdentity, NotificationStore, SessionHandle, UserId};
use metrics::counter;
use tracing::{debug, instrument};

use super::messages::{ClientMessage, GetNotifications, ServerMessage};
use crate::dispatch::Dispatcher;
use crate::faults::FaultReporter;
use crate::metrics::HUB_PROTOCOL_MESSAGES_TOTAL;
use crate::registry::ConnectionRegistry;

/// Identity of the session a frame arrived on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    /// Authenticated user.
    pub user_id: UserId,
    /// Transport connection id.
    pub handle: SessionHandle,
    /// Registry generation assigned at admission.
    pub generation: u64,
    /// Presentation fields.
    pub display: DisplayIdentity,
}

/// Replies produced by one inbound message, in send order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Effect {
    /// Messages for the originating session.
    pub replies: Vec<ServerMessage>,
}

impl Effect {
    /// No reply.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single reply.
    pub fn reply(message: ServerMessage) -> Self {
        Self {
            replies: vec![message],
        }
    }

    fn then(mut self, message: ServerMessage) -> Self {
        self.replies.push(message);
        self
    }
}

/// Executes client messages against the store and dispatcher.
pub struct ProtocolHandler {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn NotificationStore>,
    faults: FaultReporter,
}

impl ProtocolHandler {
    /// Create a handler.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn NotificationStore>,
        faults: FaultReporter,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            store,
            faults,
        }
    }

    /// Handle one raw text frame. Any frame, valid or not, counts as activity
    /// for the session's own registry generation.
    pub async fn handle_frame(&self, ctx: &SessionContext, text: &str) -> Effect {
        let _ = self.registry.touch_if_current(&ctx.user_id, ctx.generation);
        match ClientMessage::parse(text) {
            Ok(message) => {
                counter!(HUB_PROTOCOL_MESSAGES_TOTAL, "type" => message.kind()).increment(1);
                self.handle(ctx, message).await
            }
            Err(e) => {
                counter!(HUB_PROTOCOL_MESSAGES_TOTAL, "type" => "invalid").increment(1);
                debug!(user_id = %ctx.user_id, error = %e, "rejected frame");
                Effect::reply(ServerMessage::error("parse", e.to_string()))
            }
        }
    }

    /// Handle one decoded message.
    #[instrument(skip_all, fields(user_id = %ctx.user_id, kind = message.kind()))]
    pub async fn handle(&self, ctx: &SessionContext, message: ClientMessage) -> Effect {
        match message {
            ClientMessage::Activity => {
                if !self.registry.touch_if_current(&ctx.user_id, ctx.generation) {
                    debug!(generation = ctx.generation, "activity from a replaced session");
                }
                Effect::none()
            }
            ClientMessage::DashboardRefresh { widget_kind } => {
                Effect::reply(ServerMessage::DashboardRefreshResponse {
                    widget_kind,
                    timestamp: self.registry.now(),
                })
            }
            ClientMessage::Send(event) => {
                let report = self.dispatcher.route(&event).await;
                debug!(
                    notification_id = %event.id,
                    delivered = report.delivered,
                    unreachable = report.unreachable,
                    failed = report.failed,
                    "notification routed"
                );
                Effect::none()
            }
            ClientMessage::MarkRead { notification_id } => {
                match self.store.update_read_state(&notification_id, &ctx.user_id).await {
                    Ok(true) => {
                        let effect = Effect::reply(ServerMessage::MarkedRead { notification_id });
                        effect.then(self.unread_count(ctx).await)
                    }
                    Ok(false) => Effect::reply(ServerMessage::error(
                        "mark_read",
                        format!("notification {notification_id} not found"),
                    )),
                    Err(e) => {
                        self.store_failure(ctx, "mark_read", "mark notification as read", &e)
                    }
                }
            }
            ClientMessage::MarkAllRead => match self.store.bulk_mark_read(&ctx.user_id).await {
                Ok(count) => Effect::reply(ServerMessage::AllMarkedRead { count })
                    .then(self.unread_count(ctx).await),
                Err(e) => {
                    self.store_failure(ctx, "mark_all_read", "mark all notifications as read", &e)
                }
            },
            ClientMessage::Get(get) => self.list(ctx, get).await,
        }
    }

    async fn list(&self, ctx: &SessionContext, get: GetNotifications) -> Effect {
        match self.store.query(&ctx.user_id, get.to_query()).await {
            Ok(notifications) => Effect::reply(ServerMessage::List { notifications }),
            Err(e) => self.store_failure(ctx, "get_notifications", "load notifications", &e),
        }
    }

    async fn unread_count(&self, ctx: &SessionContext) -> ServerMessage {
        match self.store.count_unread(&ctx.user_id).await {
            Ok(count) => ServerMessage::UnreadCount { count },
            Err(e) => {
                self.faults.report("unread_count", Some(&ctx.user_id), e.to_string());
                ServerMessage::error("unread_count", "Failed to load unread count")
            }
        }
    }

    fn store_failure(
        &self,
        ctx: &SessionContext,
        operation: &'static str,
        action: &str,
        error: &hub_core::CollaboratorError,
    ) -> Effect {
        self.faults.report(operation, Some(&ctx.user_id), error.to_string());
        Effect::reply(ServerMessage::error(operation, format!("Failed to {action}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ClientConnection;
    use hub_core::memory::{MemoryDirectory, MemoryNotificationStore};
    use hub_core::{
        ManualClock, NotificationId, NotificationKind, NotificationRecord, NotificationStatus,
    };
    use tokio::sync::mpsc;

    struct Harness {
        handler: ProtocolHandler,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryNotificationStore>,
        faults: FaultReporter,
        clock: ManualClock,
        ctx: SessionContext,
        _rx: mpsc::Receiver<Arc<String>>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::default();
        let shared_clock: Arc<dyn hub_core::Clock> = Arc::new(clock.clone());
        let registry = Arc::new(ConnectionRegistry::new(shared_clock.clone()));
        let faults = FaultReporter::new(shared_clock.clone());
        let store = Arc::new(MemoryNotificationStore::with_clock(shared_clock));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            Arc::new(MemoryDirectory::new()),
            faults.clone(),
        ));
        let handler = ProtocolHandler::new(registry.clone(), dispatcher, store.clone(), faults.clone());

        let (tx, rx) = mpsc::channel(16);
        let handle = SessionHandle::from("conn_alice");
        let admission = registry.admit(
            UserId::from("alice"),
            handle.clone(),
            DisplayIdentity::default(),
            Arc::new(ClientConnection::new(handle.clone(), tx)),
        );
        let ctx = SessionContext {
            user_id: UserId::from("alice"),
            handle,
            generation: admission.generation,
            display: DisplayIdentity::default(),
        };
        Harness {
            handler,
            registry,
            store,
            faults,
            clock,
            ctx,
            _rx: rx,
        }
    }

    fn record(id: &str, owner: &str, priority: i32, clock: &ManualClock) -> NotificationRecord {
        NotificationRecord {
            id: NotificationId::from(id),
            user_id: UserId::from(owner),
            title: "t".into(),
            message: "m".into(),
            kind: NotificationKind::Info,
            priority,
            is_read: false,
            read_at: None,
            status: NotificationStatus::Active,
            expires_at: None,
            created_at: hub_core::Clock::now(clock),
        }
    }

    #[tokio::test]
    async fn activity_touches_without_reply() {
        let h = harness();
        h.clock.advance(chrono::Duration::minutes(3));
        let effect = h.handler.handle_frame(&h.ctx, r#"{"type":"activity"}"#).await;
        assert!(effect.replies.is_empty());
        let session = h.registry.lookup(&h.ctx.user_id).unwrap();
        assert_eq!(session.last_activity, hub_core::Clock::now(&h.clock));
    }

    #[tokio::test]
    async fn replaced_session_frames_do_not_touch_successor() {
        let h = harness();
        let (tx, _rx) = mpsc::channel(4);
        let handle = SessionHandle::from("conn_alice_2");
        let _ = h.registry.admit(
            UserId::from("alice"),
            handle.clone(),
            DisplayIdentity::default(),
            Arc::new(ClientConnection::new(handle, tx)),
        );
        let admitted_at = h.registry.lookup(&h.ctx.user_id).unwrap().last_activity;

        h.clock.advance(chrono::Duration::minutes(3));
        let _ = h.handler.handle_frame(&h.ctx, r#"{"type":"activity"}"#).await;
        let _ = h.handler.handle_frame(&h.ctx, "{{{").await;

        let session = h.registry.lookup(&h.ctx.user_id).unwrap();
        assert_eq!(session.last_activity, admitted_at);
    }

    #[tokio::test]
    async fn invalid_frame_still_touches_and_replies_parse_error() {
        let h = harness();
        h.clock.advance(chrono::Duration::minutes(3));
        let effect = h.handler.handle_frame(&h.ctx, "{{{").await;
        assert_eq!(effect.replies.len(), 1);
        assert!(matches!(&effect.replies[0], ServerMessage::Error { operation, .. } if operation == "parse"));
        let session = h.registry.lookup(&h.ctx.user_id).unwrap();
        assert_eq!(session.last_activity, hub_core::Clock::now(&h.clock));
    }

    #[tokio::test]
    async fn dashboard_refresh_echoes_widget() {
        let h = harness();
        let effect = h
            .handler
            .handle(&h.ctx, ClientMessage::DashboardRefresh { widget_kind: "revenue".into() })
            .await;
        assert_eq!(
            effect,
            Effect::reply(ServerMessage::DashboardRefreshResponse {
                widget_kind: "revenue".into(),
                timestamp: hub_core::Clock::now(&h.clock),
            })
        );
    }

    #[tokio::test]
    async fn mark_read_own_notification_pushes_count() {
        let h = harness();
        h.store.insert(record("n1", "alice", 0, &h.clock));
        h.store.insert(record("n2", "alice", 0, &h.clock));
        let effect = h
            .handler
            .handle(&h.ctx, ClientMessage::MarkRead { notification_id: "n1".into() })
            .await;
        assert_eq!(
            effect.replies,
            vec![
                ServerMessage::MarkedRead { notification_id: "n1".into() },
                ServerMessage::UnreadCount { count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn mark_read_foreign_notification_is_refused() {
        let h = harness();
        h.store.insert(record("theirs", "bob", 0, &h.clock));
        let effect = h
            .handler
            .handle(&h.ctx, ClientMessage::MarkRead { notification_id: "theirs".into() })
            .await;
        assert!(matches!(
            &effect.replies[..],
            [ServerMessage::Error { operation, .. }] if operation == "mark_read"
        ));
        assert!(!h.store.get(&"theirs".into()).unwrap().is_read);
        assert!(h.registry.contains(&h.ctx.user_id));
    }

    #[tokio::test]
    async fn mark_all_read_reports_count_then_zero() {
        let h = harness();
        for id in ["a", "b", "c"] {
            h.store.insert(record(id, "alice", 0, &h.clock));
        }
        let effect = h.handler.handle(&h.ctx, ClientMessage::MarkAllRead).await;
        assert_eq!(
            effect.replies,
            vec![
                ServerMessage::AllMarkedRead { count: 3 },
                ServerMessage::UnreadCount { count: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn get_returns_page_in_priority_order() {
        let h = harness();
        h.store.insert(record("low", "alice", 0, &h.clock));
        h.store.insert(record("high", "alice", 9, &h.clock));
        h.store.insert(record("other", "bob", 5, &h.clock));
        let effect = h
            .handler
            .handle_frame(&h.ctx, r#"{"type":"notification:get","data":{"limit":1}}"#)
            .await;
        let [ServerMessage::List { notifications }] = &effect.replies[..] else {
            panic!("expected list, got {effect:?}");
        };
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].id.as_str(), "high");
    }

    #[tokio::test]
    async fn store_failure_replies_error_and_reports_fault() {
        let h = harness();
        let mut faults = h.faults.subscribe();
        h.store.set_failing(true);
        let effect = h.handler.handle(&h.ctx, ClientMessage::MarkAllRead).await;
        assert!(matches!(
            &effect.replies[..],
            [ServerMessage::Error { operation, .. }] if operation == "mark_all_read"
        ));
        assert!(matches!(
            &effect.replies[..],
            [ServerMessage::Error { message, .. }] if message == "Failed to mark all notifications as read"
        ));
        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.operation, "mark_all_read");
        assert_eq!(fault.user_id, Some(UserId::from("alice")));
    }

    #[tokio::test]
    async fn listing_failure_names_the_failed_action() {
        let h = harness();
        h.store.set_failing(true);
        let effect = h.handler.handle(&h.ctx, ClientMessage::Get(GetNotifications::default())).await;
        assert!(matches!(
            &effect.replies[..],
            [ServerMessage::Error { operation, message }]
                if operation == "get_notifications" && message == "Failed to load notifications"
        ));
    }

    #[tokio::test]
    async fn send_routes_without_reply() {
        let h = harness();
        let effect = h
            .handler
            .handle_frame(
                &h.ctx,
                r#"{"type":"notification:send","data":{"title":"Hi","message":"all"}}"#,
            )
            .await;
        assert!(effect.replies.is_empty());
    }
}
