//! Errors surfaced by external collaborators.

use thiserror::Error;

/// Failure of an identity, permission, directory, or store call.
///
/// The realtime core never retries these; it reports them and keeps the
/// affected session alive.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Backend could not be reached or timed out. Usually transient.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// Which collaborator failed (e.g. `notification-store`).
        service: &'static str,
        /// Underlying cause.
        message: String,
    },

    /// Backend rejected or failed the request.
    #[error("{service} failed: {message}")]
    Backend {
        /// Which collaborator failed.
        service: &'static str,
        /// Underlying cause.
        message: String,
    },
}

impl CollaboratorError {
    /// Build an `Unavailable` error.
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }

    /// Build a `Backend` error.
    pub fn backend(service: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            service,
            message: message.into(),
        }
    }

    /// Name of the failing collaborator.
    pub fn service(&self) -> &'static str {
        match self {
            Self::Unavailable { service, .. } | Self::Backend { service, .. } => service,
        }
    }

    /// Whether the failure is likely transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
