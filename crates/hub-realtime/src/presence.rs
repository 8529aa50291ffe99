//! Online / away / offline classification from activity recency.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hub_core::{PresenceStatus, UserId, UserPresence};

use crate::registry::ConnectionRegistry;

/// Reads the registry to answer presence questions. Never mutates it.
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    online_window: Duration,
    away_window: Duration,
}

impl PresenceTracker {
    /// Tracker with the given windows (`online_window <= away_window`).
    pub fn new(registry: Arc<ConnectionRegistry>, online_window: Duration, away_window: Duration) -> Self {
        Self {
            registry,
            online_window,
            away_window,
        }
    }

    /// Status of `user_id` now. Unregistered users are offline.
    pub fn status_of(&self, user_id: &UserId) -> PresenceStatus {
        self.registry
            .lookup(user_id)
            .map_or(PresenceStatus::Offline, |s| self.classify(s.last_activity, self.registry.now()))
    }

    /// Classify an activity stamp against `now`.
    pub fn classify(&self, last_activity: DateTime<Utc>, now: DateTime<Utc>) -> PresenceStatus {
        classify(last_activity, now, self.online_window, self.away_window)
    }

    /// Every registered user with status and last activity, sorted by user id.
    pub fn roster(&self) -> Vec<UserPresence> {
        let now = self.registry.now();
        let mut roster: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|s| UserPresence {
                status: self.classify(s.last_activity, now),
                user_id: s.user_id,
                last_activity: Some(s.last_activity),
            })
            .collect();
        roster.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        roster
    }
}

/// Pure classification: idle `≤ online` → online, `≤ away` → away, else offline.
pub fn classify(
    last_activity: DateTime<Utc>,
    now: DateTime<Utc>,
    online_window: Duration,
    away_window: Duration,
) -> PresenceStatus {
    let idle = now.signed_duration_since(last_activity).to_std().unwrap_or_default();
    if idle <= online_window {
        PresenceStatus::Online
    } else if idle <= away_window {
        PresenceStatus::Away
    } else {
        PresenceStatus::Offline
    }
}
