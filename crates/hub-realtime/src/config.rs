//! Runtime configuration for the realtime core and its server.

use std::time::Duration;

use hub_settings::HubSettings;

/// Tunables consumed by the hub, reaper, and transport.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// Idle at most this long → online.
    pub online_window: Duration,
    /// Idle at most this long → away; beyond → offline.
    pub away_window: Duration,
    /// Time between reaper sweeps.
    pub reaper_interval: Duration,
    /// Sessions idle longer than this are evicted.
    pub idle_timeout: Duration,
    /// Capability required to open a session.
    pub realtime_capability: String,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Close a connection that has not answered pings for this long.
    pub pong_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::from_settings(&HubSettings::default())
    }
}

impl RealtimeConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &HubSettings) -> Self {
        Self {
            online_window: settings.presence.online_window(),
            away_window: settings.presence.away_window(),
            reaper_interval: settings.reaper.interval(),
            idle_timeout: settings.reaper.idle_timeout(),
            realtime_capability: settings.auth.realtime_capability.clone(),
            outbound_buffer: settings.server.outbound_buffer,
            max_message_size: settings.server.max_message_size,
            ping_interval: Duration::from_secs(settings.server.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(settings.server.pong_timeout_secs.max(1)),
        }
    }
}

/// Listener address.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
        }
    }
}

impl ServerConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &HubSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
        }
    }
}
