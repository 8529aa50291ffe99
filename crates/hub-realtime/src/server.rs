//! `RealtimeServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{ConnectInfo, Query, Request, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use hub_core::HandshakePayload;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::RealtimeHub;
use crate::reaper::run_reaper;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    hub: Arc<RealtimeHub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The realtime server.
pub struct RealtimeServer {
    config: ServerConfig,
    hub: Arc<RealtimeHub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RealtimeServer {
    /// Create a server around `hub`.
    pub fn new(config: ServerConfig, hub: Arc<RealtimeHub>) -> Self {
        Self {
            config,
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, serve, and start the reaper. Both stop on shutdown.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "realtime server listening");

        let token = self.shutdown.token();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server terminated");
            }
        });

        let reaper = tokio::spawn(run_reaper(
            self.hub.clone(),
            self.hub.config().reaper_interval,
            self.shutdown.token(),
        ));

        Ok(ServerHandle {
            local_addr,
            shutdown: self.shutdown.clone(),
            tasks: vec![server, reaper],
        })
    }

    /// The hub behind this server.
    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Listener configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close sessions, stop the reaper, and wait up to `timeout`.
    pub async fn shutdown(self, timeout: Option<Duration>) -> ShutdownReport {
        self.shutdown.graceful_shutdown(self.tasks, timeout).await
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
    request: Request,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(request.headers()));
    let handshake = HandshakePayload { token, remote_addr };

    let max = state.hub.config().max_message_size;
    let token = state.shutdown.token();
    ws.max_message_size(max).on_upgrade(move |socket| {
        state
            .shutdown
            .track_session(run_ws_session(socket, handshake, state.hub, token))
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.registry().len(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}
