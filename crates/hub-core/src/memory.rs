//! In-memory collaborator implementations.
//!
//! Used by tests across the workspace and by `hub-gateway --memory` for local
//! runs without a database.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{IdentityProvider, NotificationStore, PermissionChecker, UserDirectory};
use crate::errors::CollaboratorError;
use crate::ids::{NotificationId, UserId};
use crate::types::{
    DisplayIdentity, HandshakePayload, Identity, NewNotification, NotificationQuery,
    NotificationRecord, NotificationStatus,
};

const STORE: &str = "notification-store";

// ─────────────────────────────────────────────────────────────────────────────
// Notification store
// ─────────────────────────────────────────────────────────────────────────────

/// Notification records held in a vector.
pub struct MemoryNotificationStore {
    records: RwLock<Vec<NotificationRecord>>,
    clock: Arc<dyn Clock>,
    failing: AtomicBool,
}

impl MemoryNotificationStore {
    /// Empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            clock,
            failing: AtomicBool::new(false),
        }
    }

    /// Insert a fully-formed record (archived or expired ones included).
    pub fn insert(&self, record: NotificationRecord) {
        self.records.write().push(record);
    }

    /// Make every subsequent call fail with `Unavailable` until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Copy of a record by id, regardless of visibility.
    pub fn get(&self, id: &NotificationId) -> Option<NotificationRecord> {
        self.records.read().iter().find(|r| &r.id == id).cloned()
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(CollaboratorError::unavailable(STORE, "store offline"))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, CollaboratorError> {
        self.check()?;
        let record = NotificationRecord {
            id: NotificationId::generate(),
            user_id: notification.user_id,
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            priority: notification.priority,
            is_read: false,
            read_at: None,
            status: NotificationStatus::Active,
            expires_at: notification.expires_at,
            created_at: self.clock.now(),
        };
        self.records.write().push(record.clone());
        Ok(record)
    }

    async fn update_read_state(
        &self,
        id: &NotificationId,
        user: &UserId,
    ) -> Result<bool, CollaboratorError> {
        self.check()?;
        let now = self.clock.now();
        let mut records = self.records.write();
        let Some(record) = records
            .iter_mut()
            .find(|r| &r.id == id && &r.user_id == user && r.is_visible_at(now))
        else {
            return Ok(false);
        };
        record.is_read = true;
        record.read_at = Some(now);
        Ok(true)
    }

    async fn bulk_mark_read(&self, user: &UserId) -> Result<u64, CollaboratorError> {
        self.check()?;
        let now = self.clock.now();
        let mut changed = 0;
        for record in self.records.write().iter_mut() {
            if &record.user_id == user && !record.is_read && record.is_visible_at(now) {
                record.is_read = true;
                record.read_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn query(
        &self,
        user: &UserId,
        query: NotificationQuery,
    ) -> Result<Vec<NotificationRecord>, CollaboratorError> {
        self.check()?;
        let now = self.clock.now();
        let mut page: Vec<NotificationRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| &r.user_id == user && r.is_visible_at(now))
            .filter(|r| !query.unread_only || !r.is_read)
            .cloned()
            .collect();
        page.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(page
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count_unread(&self, user: &UserId) -> Result<u64, CollaboratorError> {
        self.check()?;
        let now = self.clock.now();
        let count = self
            .records
            .read()
            .iter()
            .filter(|r| &r.user_id == user && !r.is_read && r.is_visible_at(now))
            .count();
        Ok(count as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed token → identity table.
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticIdentityProvider {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` as resolving to `identity`.
    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        let _ = self.tokens.write().insert(token.into(), identity);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(
        &self,
        handshake: &HandshakePayload,
    ) -> Result<Option<Identity>, CollaboratorError> {
        let Some(token) = handshake.token.as_deref() else {
            return Ok(None);
        };
        Ok(self.tokens.read().get(token).cloned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory and permissions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct DirectoryUser {
    display: DisplayIdentity,
    active: bool,
}

/// Users with roles, plus per-role capability grants.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<UserId, DirectoryUser>>,
    grants: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn add_user(&self, user_id: impl Into<UserId>, display: DisplayIdentity, active: bool) {
        let _ = self
            .users
            .write()
            .insert(user_id.into(), DirectoryUser { display, active });
    }

    /// Grant `capability` to every user with `role`.
    pub fn grant(&self, role: impl Into<String>, capability: impl Into<String>) {
        let _ = self
            .grants
            .write()
            .entry(role.into())
            .or_default()
            .insert(capability.into());
    }

    /// The identity of a known user, for wiring a matching identity provider.
    pub fn identity(&self, user_id: &UserId) -> Option<Identity> {
        self.users.read().get(user_id).map(|u| Identity {
            user_id: user_id.clone(),
            display: u.display.clone(),
        })
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn list_active_users_by_role(&self, role: &str) -> Result<Vec<UserId>, CollaboratorError> {
        let mut ids: Vec<UserId> = self
            .users
            .read()
            .iter()
            .filter(|(_, u)| u.active && u.display.role_name == role)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl PermissionChecker for MemoryDirectory {
    async fn has_capability(
        &self,
        user: &UserId,
        capability: &str,
    ) -> Result<bool, CollaboratorError> {
        let users = self.users.read();
        let Some(entry) = users.get(user).filter(|u| u.active) else {
            return Ok(false);
        };
        Ok(self
            .grants
            .read()
            .get(&entry.display.role_name)
            .is_some_and(|caps| caps.contains(capability)))
    }
}
