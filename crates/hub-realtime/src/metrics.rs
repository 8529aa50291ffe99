//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup; a second call fails because a recorder is already set.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket sessions admitted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Sessions currently registered (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Sessions retired, gracefully or by eviction (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Handshakes refused (counter, labels: code).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound messages that could not be enqueued (counter).
pub const HUB_DISPATCH_DROPS_TOTAL: &str = "hub_dispatch_drops_total";
/// Sessions evicted by the reaper (counter).
pub const HUB_REAPER_EVICTIONS_TOTAL: &str = "hub_reaper_evictions_total";
/// Faults reported (counter, labels: operation).
pub const HUB_FAULTS_TOTAL: &str = "hub_faults_total";
/// Inbound protocol messages (counter, labels: type).
pub const HUB_PROTOCOL_MESSAGES_TOTAL: &str = "hub_protocol_messages_total";
