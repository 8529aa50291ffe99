//! The realtime hub: owner of the registry and the single path by which
//! sessions enter and leave it.

use std::sync::Arc;

use hub_core::{
    Clock, CollaboratorError, HandshakePayload, Identity, IdentityProvider, NewNotification,
    NotificationRecord, NotificationStore, PermissionChecker, PresenceStatus, SessionHandle,
    UserDirectory, UserId,
};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument};

use crate::config::RealtimeConfig;
use crate::dispatch::Dispatcher;
use crate::errors::{CLOSE_IDLE, CLOSE_SUPERSEDED, HandshakeError};
use crate::faults::FaultReporter;
use crate::metrics::{
    HUB_REAPER_EVICTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::presence::PresenceTracker;
use crate::protocol::{ProtocolHandler, ServerMessage, SessionContext};
use crate::registry::{ConnectedSession, ConnectionRegistry};
use crate::websocket::connection::ClientConnection;

/// External services the hub consumes.
#[derive(Clone)]
pub struct HubDeps {
    /// Resolves handshake credentials.
    pub identity: Arc<dyn IdentityProvider>,
    /// Capability checks.
    pub permissions: Arc<dyn PermissionChecker>,
    /// Role membership.
    pub directory: Arc<dyn UserDirectory>,
    /// Persistent notifications.
    pub store: Arc<dyn NotificationStore>,
}

/// Wires registry, presence, dispatcher, protocol, and collaborators.
pub struct RealtimeHub {
    config: RealtimeConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<ConnectionRegistry>,
    presence: PresenceTracker,
    dispatcher: Arc<Dispatcher>,
    protocol: ProtocolHandler,
    identity: Arc<dyn IdentityProvider>,
    permissions: Arc<dyn PermissionChecker>,
    store: Arc<dyn NotificationStore>,
    faults: FaultReporter,
}

impl RealtimeHub {
    /// Build a hub with an empty registry.
    pub fn new(deps: HubDeps, config: RealtimeConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(clock.clone()));
        let faults = FaultReporter::new(clock.clone());
        let presence =
            PresenceTracker::new(registry.clone(), config.online_window, config.away_window);
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            deps.directory,
            faults.clone(),
        ));
        let protocol = ProtocolHandler::new(
            registry.clone(),
            dispatcher.clone(),
            deps.store.clone(),
            faults.clone(),
        );
        Self {
            config,
            clock,
            registry,
            presence,
            dispatcher,
            protocol,
            identity: deps.identity,
            permissions: deps.permissions,
            store: deps.store,
            faults,
        }
    }

    /// Resolve and authorize handshake credentials.
    ///
    /// Collaborator failures are reported as faults and refuse the session.
    pub async fn authenticate(
        &self,
        handshake: &HandshakePayload,
    ) -> Result<Identity, HandshakeError> {
        let identity = match self.identity.authenticate(handshake).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return Err(HandshakeError::Unauthenticated),
            Err(e) => {
                self.faults.report("authenticate", None, e.to_string());
                return Err(HandshakeError::IdentityUnavailable(e));
            }
        };
        let capability = &self.config.realtime_capability;
        match self.permissions.has_capability(&identity.user_id, capability).await {
            Ok(true) => Ok(identity),
            Ok(false) => Err(HandshakeError::Forbidden {
                capability: capability.clone(),
            }),
            Err(e) => {
                self.faults
                    .report("authorize", Some(&identity.user_id), e.to_string());
                Err(HandshakeError::PermissionUnavailable(e))
            }
        }
    }

    /// Admit an authenticated session.
    ///
    /// Replaces any previous session of the same user and closes its
    /// transport, announces the user as online to everyone else, and pushes
    /// the unread count.
    #[instrument(skip_all, fields(user_id = %identity.user_id, conn_id = %connection.id))]
    pub async fn connect(
        &self,
        identity: Identity,
        connection: Arc<ClientConnection>,
    ) -> SessionContext {
        let handle: SessionHandle = connection.id.clone();
        let admission = self.registry.admit(
            identity.user_id.clone(),
            handle.clone(),
            identity.display.clone(),
            connection,
        );
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        self.record_active();
        info!(
            generation = admission.generation,
            superseded = admission.superseded.is_some(),
            "session admitted"
        );
        if let Some(previous) = &admission.superseded {
            previous
                .connection
                .close_with(CLOSE_SUPERSEDED, "session replaced");
        }

        let _ = self.dispatcher.broadcast_except(
            &identity.user_id,
            &ServerMessage::UserStatus {
                user_id: identity.user_id.clone(),
                status: PresenceStatus::Online,
                last_activity: Some(self.clock.now()),
            },
        );
        let _ = self.push_unread_count(&identity.user_id).await;

        SessionContext {
            user_id: identity.user_id,
            handle,
            generation: admission.generation,
            display: identity.display,
        }
    }

    /// Retire a session whose transport closed.
    ///
    /// Only the current generation is removed; a superseded session's close
    /// is a no-op and announces nothing. Returns whether anything was removed.
    pub fn disconnect(&self, ctx: &SessionContext) -> bool {
        match self.registry.remove_if_current(&ctx.user_id, ctx.generation) {
            Some(session) => {
                self.retire(&session, "closed");
                true
            }
            None => {
                debug!(user_id = %ctx.user_id, generation = ctx.generation, "stale disconnect ignored");
                false
            }
        }
    }

    /// Evict `user_id` if `generation` is still current and idle past the
    /// timeout. The transport is told to close. Returns whether it was evicted.
    pub fn evict_idle(&self, user_id: &UserId, generation: u64) -> bool {
        let Some(session) = self.registry.evict_if_idle(
            user_id,
            generation,
            self.config.idle_timeout,
            self.clock.now(),
        ) else {
            return false;
        };
        session.connection.close_with(CLOSE_IDLE, "idle timeout");
        counter!(HUB_REAPER_EVICTIONS_TOTAL).increment(1);
        self.retire(&session, "idle");
        true
    }

    /// Push the user's current unread count to their session.
    ///
    /// Returns the count, or `None` when the store failed (reported as a fault).
    pub async fn push_unread_count(&self, user_id: &UserId) -> Option<u64> {
        match self.store.count_unread(user_id).await {
            Ok(count) => {
                let _ = self
                    .dispatcher
                    .send_to_user(user_id, &ServerMessage::UnreadCount { count });
                Some(count)
            }
            Err(e) => {
                self.faults.report("unread_count", Some(user_id), e.to_string());
                None
            }
        }
    }

    /// Persist a notification, deliver it to its owner, and refresh their count.
    #[instrument(skip_all, fields(user_id = %notification.user_id))]
    pub async fn publish(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, CollaboratorError> {
        let record = self.store.create(notification).await.inspect_err(|e| {
            self.faults.report("publish", None, e.to_string());
        })?;
        let _ = self.dispatcher.route(&record.to_event()).await;
        let _ = self.push_unread_count(&record.user_id).await;
        Ok(record)
    }

    fn retire(&self, session: &ConnectedSession, reason: &'static str) {
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(session.connection.age().as_secs_f64());
        self.record_active();
        info!(
            user_id = %session.user_id,
            conn_id = %session.handle,
            generation = session.generation,
            reason,
            "session retired"
        );
        // A newer admission may have landed since the entry was removed.
        let newer = self
            .registry
            .lookup(&session.user_id)
            .map(|current| current.generation)
            .filter(|generation| *generation > session.generation);
        if let Some(generation) = newer {
            debug!(
                user_id = %session.user_id,
                generation,
                "offline status suppressed by newer session"
            );
            return;
        }
        let _ = self.dispatcher.broadcast(&ServerMessage::UserStatus {
            user_id: session.user_id.clone(),
            status: PresenceStatus::Offline,
            last_activity: Some(session.last_activity),
        });
    }

    fn record_active(&self) {
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.registry.len() as f64);
    }

    /// Tunables.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Presence queries.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Fan-out.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Per-session message handling.
    pub fn protocol(&self) -> &ProtocolHandler {
        &self.protocol
    }

    /// Fault channel.
    pub fn faults(&self) -> &FaultReporter {
        &self.faults
    }
}
