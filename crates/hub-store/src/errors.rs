//! Error types for the `SQLite` backend.

use hub_core::CollaboratorError;
use thiserror::Error;

/// Errors from pool, schema, or query operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error (exhausted or unable to open).
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// A stored column held a value that does not decode.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// The blocking task running the query panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Map to the boundary error for `service`.
    ///
    /// Pool and task failures mean the backend is unreachable right now;
    /// everything else is a backend failure.
    pub fn into_collaborator(self, service: &'static str) -> CollaboratorError {
        match self {
            Self::Pool(_) | Self::Join(_) => CollaboratorError::unavailable(service, self.to_string()),
            Self::Sqlite(rusqlite::Error::SqliteFailure(ref e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                CollaboratorError::unavailable(service, self.to_string())
            }
            other => CollaboratorError::backend(service, other.to_string()),
        }
    }
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
