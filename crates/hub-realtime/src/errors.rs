//! Handshake rejection reasons.

use hub_core::CollaboratorError;
use thiserror::Error;

/// WebSocket close code for a handshake without a valid identity.
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;
/// WebSocket close code for an identity lacking the realtime capability.
pub const CLOSE_FORBIDDEN: u16 = 4003;
/// WebSocket close code sent to a session replaced by a newer one for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// WebSocket close code sent to a session evicted for inactivity.
pub const CLOSE_IDLE: u16 = 4008;

/// Why a session was refused during the handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No credentials, or credentials that identify nobody.
    #[error("authentication required")]
    Unauthenticated,

    /// The identity provider failed; treated as unauthenticated.
    #[error("identity provider failed: {0}")]
    IdentityUnavailable(#[source] CollaboratorError),

    /// The user lacks the realtime capability.
    #[error("missing capability {capability}")]
    Forbidden {
        /// Capability that was checked.
        capability: String,
    },

    /// The permission checker failed; treated as forbidden.
    #[error("permission check failed: {0}")]
    PermissionUnavailable(#[source] CollaboratorError),
}

impl HandshakeError {
    /// Close code sent before dropping the socket.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Unauthenticated | Self::IdentityUnavailable(_) => CLOSE_UNAUTHENTICATED,
            Self::Forbidden { .. } | Self::PermissionUnavailable(_) => CLOSE_FORBIDDEN,
        }
    }

    /// Short close reason safe to show a client.
    pub fn close_reason(&self) -> &'static str {
        match self.close_code() {
            CLOSE_UNAUTHENTICATED => "Authentication failed",
            _ => "Forbidden",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes() {
        assert_eq!(HandshakeError::Unauthenticated.close_code(), 4001);
        assert_eq!(
            HandshakeError::IdentityUnavailable(CollaboratorError::unavailable("identity", "down"))
                .close_code(),
            4001
        );
        let forbidden = HandshakeError::Forbidden {
            capability: "read_realtime_data".into(),
        };
        assert_eq!(forbidden.close_code(), 4003);
        assert_eq!(forbidden.close_reason(), "Forbidden");
        assert!(forbidden.to_string().contains("read_realtime_data"));
    }

    #[test]
    fn collaborator_failures_keep_source() {
        let err = HandshakeError::PermissionUnavailable(CollaboratorError::backend("perms", "boom"));
        assert_eq!(err.close_code(), 4003);
        assert!(std::error::Error::source(&err).is_some());
    }
}
