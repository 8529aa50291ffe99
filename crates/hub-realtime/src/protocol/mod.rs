//! Notification session protocol: wire messages and per-session handling.
//!
//! Frames are JSON text with the envelope `{"type": ..., "data": ...}`;
//! outbound frames also carry a `timestamp`.

pub mod handler;
pub mod messages;

pub use handler::{Effect, ProtocolHandler, SessionContext};
pub use messages::{ClientMessage, GetNotifications, ProtocolError, ServerMessage, encode};
