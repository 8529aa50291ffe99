//! # hub-realtime
//!
//! The realtime notification core of Analytics Hub.
//!
//! - [`registry`]: one session per user, last writer wins by generation
//! - [`presence`]: online / away / offline from last activity
//! - [`dispatch`]: fan-out to a user, a role cohort, or everyone
//! - [`protocol`]: the JSON message protocol spoken by each session
//! - [`reaper`]: periodic eviction of idle sessions
//! - [`hub`]: wires the above to the collaborator traits
//! - [`server`] and [`websocket`]: the Axum transport

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod faults;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{RealtimeConfig, ServerConfig};
pub use dispatch::{DispatchReport, Dispatcher};
pub use errors::HandshakeError;
pub use faults::{Fault, FaultReporter};
pub use hub::{HubDeps, RealtimeHub};
pub use presence::PresenceTracker;
pub use registry::{ConnectedSession, ConnectionRegistry};
pub use server::{RealtimeServer, ServerHandle};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
