//! Async collaborator adapters over the `SQLite` repositories.
//!
//! Each call checks out a pooled connection on tokio's blocking pool, runs
//! one repository method, and maps [`StoreError`] to [`CollaboratorError`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_core::{
    Clock, CollaboratorError, DisplayIdentity, Identity, NewNotification, NotificationId,
    NotificationQuery, NotificationRecord, NotificationStatus, NotificationStore,
    PermissionChecker, SystemClock, UserDirectory, UserId,
};
use rusqlite::Connection;
use tracing::instrument;

use crate::errors::{Result, StoreError};
use crate::sqlite::connection::{ConnectionConfig, ConnectionPool, new_file};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::{DirectoryRepo, NotificationRepo};

const STORE_SERVICE: &str = "notification-store";
const DIRECTORY_SERVICE: &str = "user-directory";

async fn blocking<T, F>(pool: &ConnectionPool, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn)
    })
    .await?
}

/// Open a file-backed pool and bring its schema up to date.
pub fn open_pool(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let pool = new_file(path, config)?;
    let conn = pool.get()?;
    let _ = run_migrations(&conn)?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification store
// ─────────────────────────────────────────────────────────────────────────────

/// [`NotificationStore`] backed by the `notifications` table.
#[derive(Clone)]
pub struct SqliteNotificationStore {
    pool: ConnectionPool,
    clock: Arc<dyn Clock>,
}

impl SqliteNotificationStore {
    /// Wrap a migrated pool, using the system clock.
    pub fn new(pool: ConnectionPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Wrap a migrated pool with an injected clock for visibility checks.
    pub fn with_clock(pool: ConnectionPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Fetch a record regardless of owner or visibility.
    pub async fn get(&self, id: &NotificationId) -> Result<Option<NotificationRecord>> {
        let id = id.clone();
        blocking(&self.pool, move |conn| NotificationRepo::get(conn, &id)).await
    }

    /// Archive a record owned by `user`, hiding it from every listing.
    pub async fn archive(&self, id: &NotificationId, user: &UserId) -> Result<bool> {
        let (id, user) = (id.clone(), user.clone());
        blocking(&self.pool, move |conn| NotificationRepo::archive(conn, &id, &user)).await
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn store_err(e: StoreError) -> CollaboratorError {
    e.into_collaborator(STORE_SERVICE)
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    #[instrument(skip_all, fields(user_id = %notification.user_id))]
    async fn create(
        &self,
        notification: NewNotification,
    ) -> std::result::Result<NotificationRecord, CollaboratorError> {
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
            created_at: self.now(),
        };
        let stored = record.clone();
        blocking(&self.pool, move |conn| NotificationRepo::insert(conn, &stored))
            .await
            .map_err(store_err)?;
        Ok(record)
    }

    async fn update_read_state(
        &self,
        id: &NotificationId,
        user: &UserId,
    ) -> std::result::Result<bool, CollaboratorError> {
        let (id, user, now) = (id.clone(), user.clone(), self.now());
        blocking(&self.pool, move |conn| NotificationRepo::mark_read(conn, &id, &user, now))
            .await
            .map_err(store_err)
    }

    async fn bulk_mark_read(&self, user: &UserId) -> std::result::Result<u64, CollaboratorError> {
        let (user, now) = (user.clone(), self.now());
        blocking(&self.pool, move |conn| NotificationRepo::mark_all_read(conn, &user, now))
            .await
            .map_err(store_err)
    }

    async fn query(
        &self,
        user: &UserId,
        query: NotificationQuery,
    ) -> std::result::Result<Vec<NotificationRecord>, CollaboratorError> {
        let (user, now) = (user.clone(), self.now());
        blocking(&self.pool, move |conn| NotificationRepo::list(conn, &user, query, now))
            .await
            .map_err(store_err)
    }

    async fn count_unread(&self, user: &UserId) -> std::result::Result<u64, CollaboratorError> {
        let (user, now) = (user.clone(), self.now());
        blocking(&self.pool, move |conn| NotificationRepo::count_unread(conn, &user, now))
            .await
            .map_err(store_err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory / permissions
// ─────────────────────────────────────────────────────────────────────────────

/// [`UserDirectory`] and [`PermissionChecker`] backed by `users` and
/// `role_capabilities`.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: ConnectionPool,
}

impl SqliteDirectory {
    /// Wrap a migrated pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a user.
    pub async fn upsert_user(
        &self,
        user_id: &UserId,
        display: &DisplayIdentity,
        active: bool,
    ) -> Result<()> {
        let (user_id, display) = (user_id.clone(), display.clone());
        blocking(&self.pool, move |conn| {
            DirectoryRepo::upsert_user(conn, &user_id, &display, active)
        })
        .await
    }

    /// Grant a capability to a role.
    pub async fn grant(&self, role: &str, capability: &str) -> Result<()> {
        let (role, capability) = (role.to_owned(), capability.to_owned());
        blocking(&self.pool, move |conn| DirectoryRepo::grant(conn, &role, &capability)).await
    }

    /// Look up a user's identity.
    pub async fn identity(&self, user_id: &UserId) -> Result<Option<Identity>> {
        let user_id = user_id.clone();
        blocking(&self.pool, move |conn| DirectoryRepo::get_identity(conn, &user_id)).await
    }
}

#[async_trait]
impl UserDirectory for SqliteDirectory {
    async fn list_active_users_by_role(
        &self,
        role: &str,
    ) -> std::result::Result<Vec<UserId>, CollaboratorError> {
        let role = role.to_owned();
        blocking(&self.pool, move |conn| DirectoryRepo::active_users_by_role(conn, &role))
            .await
            .map_err(|e| e.into_collaborator(DIRECTORY_SERVICE))
    }
}

#[async_trait]
impl PermissionChecker for SqliteDirectory {
    async fn has_capability(
        &self,
        user: &UserId,
        capability: &str,
    ) -> std::result::Result<bool, CollaboratorError> {
        let (user, capability) = (user.clone(), capability.to_owned());
        blocking(&self.pool, move |conn| {
            DirectoryRepo::has_capability(conn, &user, &capability)
        })
        .await
        .map_err(|e| e.into_collaborator(DIRECTORY_SERVICE))
    }
}
