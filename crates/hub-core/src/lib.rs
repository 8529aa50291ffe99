//! # hub-core
//!
//! Shared vocabulary for the Analytics Hub realtime notification core.
//!
//! - **Branded IDs**: [`UserId`], [`NotificationId`], [`SessionHandle`]
//! - **Domain types**: identities, notification events and records, presence
//! - **Collaborator traits**: identity, permission, user directory, and
//!   notification store boundaries consumed by the realtime core
//! - **Clock**: injectable time source so presence and eviction are testable
//! - **Memory collaborators**: in-process implementations of every trait

#![deny(unsafe_code)]

pub mod clock;
pub mod collaborators;
pub mod errors;
pub mod ids;
pub mod memory;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{IdentityProvider, NotificationStore, PermissionChecker, UserDirectory};
pub use errors::CollaboratorError;
pub use ids::{NotificationId, SessionHandle, UserId};
pub use types::*;
