//! Settings sections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Presence thresholds.
    pub presence: PresenceSettings,
    /// Idle reaper schedule.
    pub reaper: ReaperSettings,
    /// Handshake authentication and authorization.
    pub auth: AuthSettings,
    /// Notification store backend.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Reject combinations the realtime core cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.presence.away_window_secs < self.presence.online_window_secs {
            return Err(SettingsError::InvalidValue(format!(
                "presence.awayWindowSecs ({}) must be >= presence.onlineWindowSecs ({})",
                self.presence.away_window_secs, self.presence.online_window_secs
            )));
        }
        if self.reaper.interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "reaper.intervalSecs must be positive".into(),
            ));
        }
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundBuffer must be positive".into(),
            ));
        }
        if self.auth.realtime_capability.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.realtimeCapability must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and per-connection transport limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port (0 = auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Interval between server Ping frames.
    pub ping_interval_secs: u64,
    /// Close a connection that has not answered pings for this long.
    pub pong_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4010,
            max_message_size: 1024 * 1024,
            outbound_buffer: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
        }
    }
}

/// Thresholds for online / away / offline classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Idle at most this long → online.
    pub online_window_secs: u64,
    /// Idle at most this long → away; beyond → offline.
    pub away_window_secs: u64,
}

impl PresenceSettings {
    /// Online window as a `Duration`.
    pub fn online_window(&self) -> Duration {
        Duration::from_secs(self.online_window_secs)
    }

    /// Away window as a `Duration`.
    pub fn away_window(&self) -> Duration {
        Duration::from_secs(self.away_window_secs)
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            online_window_secs: 5 * 60,
            away_window_secs: 30 * 60,
        }
    }
}

/// Idle reaper schedule.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaperSettings {
    /// Time between sweeps.
    pub interval_secs: u64,
    /// Sessions idle longer than this are evicted.
    pub idle_timeout_secs: u64,
}

impl ReaperSettings {
    /// Sweep interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Idle timeout as a `Duration`.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5 * 60,
            idle_timeout_secs: 30 * 60,
        }
    }
}

/// Handshake settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret for session tokens. Empty disables JWT auth.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jwt_secret: String,
    /// Capability a user must hold to open a realtime session.
    pub realtime_capability: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            realtime_capability: "read_realtime_data".into(),
        }
    }
}

/// Notification store backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// `SQLite` database path, relative to the settings directory unless absolute.
    pub db_path: String,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "hub.db".into(),
            pool_size: 8,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
