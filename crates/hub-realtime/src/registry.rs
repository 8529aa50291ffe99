//! Connection registry: the one piece of mutable state shared across sessions.
//!
//! Maps each user to at most one live session. A new admission for a user
//! replaces the old entry and gets a fresh generation; removals that carry a
//! generation only succeed while that generation is still current, so a
//! late close from a superseded socket never unregisters its replacement.
//!
//! The lock is a `parking_lot::RwLock` and is never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hub_core::{Clock, DisplayIdentity, SessionHandle, UserId};
use parking_lot::RwLock;
use tracing::debug;

use crate::websocket::connection::ClientConnection;

/// A registered session. Cloning is cheap; the transport is shared.
#[derive(Clone)]
pub struct ConnectedSession {
    /// Owner.
    pub user_id: UserId,
    /// Transport connection id.
    pub handle: SessionHandle,
    /// Presentation fields only.
    pub display: DisplayIdentity,
    /// Last observed inbound activity.
    pub last_activity: DateTime<Utc>,
    /// Registry-assigned admission stamp.
    pub generation: u64,
    /// Outbound transport.
    pub connection: Arc<ClientConnection>,
}

impl std::fmt::Debug for ConnectedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedSession")
            .field("user_id", &self.user_id)
            .field("handle", &self.handle)
            .field("last_activity", &self.last_activity)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`ConnectionRegistry::admit`].
#[derive(Debug)]
pub struct Admission {
    /// Generation of the new entry.
    pub generation: u64,
    /// Entry that was replaced, if any. It is not notified.
    pub superseded: Option<ConnectedSession>,
}

/// In-memory map `UserId → ConnectedSession`.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<UserId, ConnectedSession>>,
    next_generation: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    /// Empty registry reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            clock,
        }
    }

    /// Insert or replace the entry for `user_id`, stamping activity now.
    pub fn admit(
        &self,
        user_id: UserId,
        handle: SessionHandle,
        display: DisplayIdentity,
        connection: Arc<ClientConnection>,
    ) -> Admission {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let session = ConnectedSession {
            user_id: user_id.clone(),
            handle,
            display,
            last_activity: self.clock.now(),
            generation,
            connection,
        };
        let superseded = self.sessions.write().insert(user_id, session);
        if let Some(prev) = &superseded {
            debug!(
                user_id = %prev.user_id,
                old_generation = prev.generation,
                generation,
                "session superseded"
            );
        }
        Admission {
            generation,
            superseded,
        }
    }

    /// Refresh `last_activity` if `generation` is still the user's entry.
    ///
    /// Returns `false` for unknown users and for replaced sessions, whose
    /// activity must not keep their successor alive.
    pub fn touch_if_current(&self, user_id: &UserId, generation: u64) -> bool {
        let now = self.clock.now();
        match self.sessions.write().get_mut(user_id) {
            Some(session) if session.generation == generation => {
                session.last_activity = now;
                true
            }
            _ => false,
        }
    }

    /// Whether `generation` is the user's registered entry.
    pub fn is_current(&self, user_id: &UserId, generation: u64) -> bool {
        self.sessions
            .read()
            .get(user_id)
            .is_some_and(|session| session.generation == generation)
    }

    /// Drop the entry for `user_id` whatever its generation. Idempotent.
    pub fn remove(&self, user_id: &UserId) -> Option<ConnectedSession> {
        self.sessions.write().remove(user_id)
    }

    /// Drop the entry only if it still carries `generation`.
    pub fn remove_if_current(&self, user_id: &UserId, generation: u64) -> Option<ConnectedSession> {
        let mut sessions = self.sessions.write();
        match sessions.get(user_id) {
            Some(session) if session.generation == generation => sessions.remove(user_id),
            _ => None,
        }
    }

    /// Drop the entry only if it still carries `generation` and has been idle
    /// longer than `threshold` at `now`. Check and removal happen under one lock.
    pub fn evict_if_idle(
        &self,
        user_id: &UserId,
        generation: u64,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Option<ConnectedSession> {
        let mut sessions = self.sessions.write();
        match sessions.get(user_id) {
            Some(session)
                if session.generation == generation
                    && is_idle(session.last_activity, threshold, now) =>
            {
                sessions.remove(user_id)
            }
            _ => None,
        }
    }

    /// Current entry for `user_id`.
    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectedSession> {
        self.sessions.read().get(user_id).cloned()
    }

    /// Whether `user_id` has an entry.
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.sessions.read().contains_key(user_id)
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<ConnectedSession> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// The registry's time source.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Strictly longer than `threshold` since `last_activity`.
pub fn is_idle(last_activity: DateTime<Utc>, threshold: Duration, now: DateTime<Utc>) -> bool {
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    now.signed_duration_since(last_activity) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::ManualClock;
    use tokio::sync::mpsc;

    fn connection(id: &str) -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(ClientConnection::new(SessionHandle::from(id), tx))
    }

    fn registry() -> (ConnectionRegistry, ManualClock) {
        let clock = ManualClock::default();
        (ConnectionRegistry::new(Arc::new(clock.clone())), clock)
    }

    fn admit(reg: &ConnectionRegistry, user: &str, conn: &str) -> Admission {
        reg.admit(
            UserId::from(user),
            SessionHandle::from(conn),
            DisplayIdentity::default(),
            connection(conn),
        )
    }

    #[test]
    fn last_writer_wins() {
        let (reg, _) = registry();
        let first = admit(&reg, "u", "s1");
        let second = admit(&reg, "u", "s2");
        assert!(first.superseded.is_none());
        assert_eq!(second.superseded.unwrap().handle.as_str(), "s1");
        assert!(second.generation > first.generation);

        let current = reg.lookup(&UserId::from("u")).unwrap();
        assert_eq!(current.handle.as_str(), "s2");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn admit_then_remove_leaves_nothing() {
        let (reg, _) = registry();
        let _ = admit(&reg, "u", "s1");
        assert!(reg.remove(&UserId::from("u")).is_some());
        assert!(reg.lookup(&UserId::from("u")).is_none());
        assert!(reg.remove(&UserId::from("u")).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn stale_generation_cannot_remove_replacement() {
        let (reg, _) = registry();
        let old = admit(&reg, "u", "s1");
        let new = admit(&reg, "u", "s2");
        assert!(reg.remove_if_current(&UserId::from("u"), old.generation).is_none());
        assert!(reg.contains(&UserId::from("u")));
        assert!(reg.remove_if_current(&UserId::from("u"), new.generation).is_some());
        assert!(!reg.contains(&UserId::from("u")));
    }

    #[test]
    fn touch_updates_activity_and_ignores_unknown() {
        let (reg, clock) = registry();
        let adm = admit(&reg, "u", "s1");
        let admitted_at = reg.lookup(&UserId::from("u")).unwrap().last_activity;

        clock.advance(chrono::Duration::seconds(42));
        assert!(reg.touch_if_current(&UserId::from("u"), adm.generation));
        assert!(!reg.touch_if_current(&UserId::from("ghost"), adm.generation));

        let touched = reg.lookup(&UserId::from("u")).unwrap().last_activity;
        assert_eq!(touched - admitted_at, chrono::Duration::seconds(42));
        assert!(reg.lookup(&UserId::from("ghost")).is_none());
    }

    #[test]
    fn replaced_generation_cannot_refresh_successor() {
        let (reg, clock) = registry();
        let user = UserId::from("u");
        let old = admit(&reg, "u", "s1");
        let new = admit(&reg, "u", "s2");
        let admitted_at = reg.lookup(&user).unwrap().last_activity;

        clock.advance(chrono::Duration::minutes(10));
        assert!(!reg.touch_if_current(&user, old.generation));
        assert_eq!(reg.lookup(&user).unwrap().last_activity, admitted_at);
        assert!(!reg.is_current(&user, old.generation));
        assert!(reg.is_current(&user, new.generation));
    }

    #[test]
    fn evict_if_idle_rechecks_staleness_and_generation() {
        let (reg, clock) = registry();
        let threshold = Duration::from_secs(1800);
        let adm = admit(&reg, "u", "s1");
        let user = UserId::from("u");

        clock.advance(chrono::Duration::minutes(29));
        assert!(reg.evict_if_idle(&user, adm.generation, threshold, clock.now()).is_none());

        clock.advance(chrono::Duration::minutes(2));
        assert!(reg.evict_if_idle(&user, adm.generation + 99, threshold, clock.now()).is_none());
        assert!(reg.evict_if_idle(&user, adm.generation, threshold, clock.now()).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn exactly_at_threshold_is_not_idle() {
        let now = Utc::now();
        let threshold = Duration::from_secs(60);
        assert!(!is_idle(now - chrono::Duration::seconds(60), threshold, now));
        assert!(is_idle(now - chrono::Duration::seconds(61), threshold, now));
    }

    #[test]
    fn snapshot_is_detached() {
        let (reg, _) = registry();
        let _ = admit(&reg, "a", "s1");
        let _ = admit(&reg, "b", "s2");
        let snap = reg.snapshot();
        let _ = reg.remove(&UserId::from("a"));
        assert_eq!(snap.len(), 2);
        assert_eq!(reg.len(), 1);
    }
}
