//! Boundary traits for the services the realtime core consumes.
//!
//! Implementations live outside the core: `hub-store` backs the store,
//! directory and permission traits with `SQLite`, `hub-auth` backs identity
//! with JWTs, and [`crate::memory`] provides in-process versions.

use async_trait::async_trait;

use crate::errors::CollaboratorError;
use crate::ids::{NotificationId, UserId};
use crate::types::{HandshakePayload, Identity, NewNotification, NotificationQuery, NotificationRecord};

/// Resolves handshake credentials to a user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` when the credentials do not identify anyone.
    async fn authenticate(
        &self,
        handshake: &HandshakePayload,
    ) -> Result<Option<Identity>, CollaboratorError>;
}

/// Capability checks for an authenticated user.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether `user` holds `capability`.
    async fn has_capability(&self, user: &UserId, capability: &str)
    -> Result<bool, CollaboratorError>;
}

/// Role membership lookups.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Ids of every active user holding `role`.
    async fn list_active_users_by_role(&self, role: &str) -> Result<Vec<UserId>, CollaboratorError>;
}

/// Persistent notification records.
///
/// Every read and mutation is scoped to the owning user and ignores records
/// that are not active or have expired.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new notification and return the stored record.
    async fn create(&self, notification: NewNotification)
    -> Result<NotificationRecord, CollaboratorError>;

    /// Mark one notification read. Returns `false` when no visible record with
    /// that id belongs to `user`; nothing is mutated in that case.
    async fn update_read_state(
        &self,
        id: &NotificationId,
        user: &UserId,
    ) -> Result<bool, CollaboratorError>;

    /// Mark every visible unread notification of `user` read. Returns how many changed.
    async fn bulk_mark_read(&self, user: &UserId) -> Result<u64, CollaboratorError>;

    /// One page of `user`'s visible notifications, priority descending then newest first.
    async fn query(
        &self,
        user: &UserId,
        query: NotificationQuery,
    ) -> Result<Vec<NotificationRecord>, CollaboratorError>;

    /// Number of visible unread notifications of `user`.
    async fn count_unread(&self, user: &UserId) -> Result<u64, CollaboratorError>;
}
