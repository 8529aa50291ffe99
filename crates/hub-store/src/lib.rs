//! # hub-store
//!
//! `SQLite` implementations of the collaborator traits from `hub-core`:
//!
//! - [`SqliteNotificationStore`]: [`hub_core::NotificationStore`]
//! - [`SqliteDirectory`]: [`hub_core::UserDirectory`] and
//!   [`hub_core::PermissionChecker`] over `users` / `role_capabilities`
//!
//! Connections come from an `r2d2` pool with WAL mode. Repositories are
//! synchronous and take `&Connection`; the async adapters move each call onto
//! the blocking pool with `spawn_blocking`.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use sqlite::connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use sqlite::migrations::run_migrations;
pub use store::{SqliteDirectory, SqliteNotificationStore, open_pool};
