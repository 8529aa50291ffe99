//! Branded ID newtypes.
//!
//! Users, notifications, and transport sessions are all identified by opaque
//! strings. Wrapping each in its own type keeps a connection handle from being
//! passed where a user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Stable identifier of an authenticated user.
    UserId
}

branded_id! {
    /// Identifier of a persisted notification record.
    NotificationId
}

branded_id! {
    /// Transport-specific identifier of one live connection. Opaque to the core.
    SessionHandle
}

impl NotificationId {
    /// Generate a fresh time-ordered notification id (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl SessionHandle {
    /// Generate a fresh connection handle, prefixed `conn_`.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::now_v7().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_inner() {
        let id = UserId::from("user-7");
        assert_eq!(id.to_string(), "user-7");
        assert_eq!(id.as_str(), "user-7");
    }

    #[test]
    fn serde_is_transparent() {
        let id = NotificationId::from("n-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"n-1\"");
        let back: NotificationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_handles_are_unique_and_prefixed() {
        let a = SessionHandle::generate();
        let b = SessionHandle::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
    }

    #[test]
    fn generated_notification_ids_are_uuids() {
        let id = NotificationId::generate();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn into_inner_round_trips_string() {
        let id = UserId::from_string("abc".to_owned());
        let s: String = id.into();
        assert_eq!(s, "abc");
    }
}
