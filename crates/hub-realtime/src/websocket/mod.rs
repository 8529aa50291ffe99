//! WebSocket transport: per-client connection state and the session loop.

pub mod connection;
pub mod session;
