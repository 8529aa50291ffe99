//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use hub_core::{HandshakePayload, SessionHandle};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, field, info, instrument, warn};

use super::connection::ClientConnection;
use crate::errors::HandshakeError;
use crate::hub::RealtimeHub;
use crate::metrics::WS_HANDSHAKE_REJECTIONS_TOTAL;
use crate::protocol::{SessionContext, encode};

/// Close code for a server going away.
const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code when the connection was closed without a recorded reason.
const CLOSE_NORMAL: u16 = 1000;

/// How long the writer gets to flush a final close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocket, Message>;

/// Run one WebSocket session.
///
/// 1. Authenticates the handshake; a refusal closes with 4001 / 4003 and
///    registers nothing
/// 2. Admits the session through the hub (unread count, online status)
/// 3. Feeds inbound frames to the protocol handler and enqueues its replies
/// 4. A writer task drains the outbound queue and sends periodic Pings
/// 5. Retires the session when the socket closes, the reaper evicts it, or
///    the server shuts down
#[instrument(skip_all, fields(conn_id = field::Empty, user_id = field::Empty))]
pub async fn run_ws_session(
    mut ws: WebSocket,
    handshake: HandshakePayload,
    hub: Arc<RealtimeHub>,
    shutdown: CancellationToken,
) {
    let identity = match hub.authenticate(&handshake).await {
        Ok(identity) => identity,
        Err(e) => {
            reject(&mut ws, &e, handshake.remote_addr.as_deref()).await;
            return;
        }
    };

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(hub.config().outbound_buffer);
    let connection = Arc::new(ClientConnection::new(SessionHandle::generate(), send_tx));
    let span = Span::current();
    let _ = span.record("conn_id", connection.id.as_str());
    let _ = span.record("user_id", identity.user_id.as_str());

    let (ws_tx, mut ws_rx) = ws.split();
    let writer = spawn_writer(
        ws_tx,
        send_rx,
        connection.clone(),
        hub.config().ping_interval,
        hub.config().pong_timeout,
        shutdown.clone(),
    );

    let ctx = hub.connect(identity, connection.clone()).await;
    info!(generation = ctx.generation, "client connected");

    let reason = read_loop(&mut ws_rx, &hub, &ctx, &connection, &shutdown).await;

    let _ = hub.disconnect(&ctx);
    match reason {
        EndReason::ClientClosed => writer.abort(),
        EndReason::ServerClosed | EndReason::ServerShutdown => {
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                debug!("writer did not flush the close frame in time");
            }
        }
    }
    connection.close();
    info!(?reason, "client disconnected");
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EndReason {
    ClientClosed,
    /// Evicted by the reaper, replaced by a newer session, or the writer
    /// gave up on a silent client.
    ServerClosed,
    ServerShutdown,
}

async fn read_loop(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    hub: &RealtimeHub,
    ctx: &SessionContext,
    connection: &ClientConnection,
    shutdown: &CancellationToken,
) -> EndReason {
    loop {
        let frame = tokio::select! {
            () = connection.closed() => return EndReason::ServerClosed,
            () = shutdown.cancelled() => return EndReason::ServerShutdown,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                return EndReason::ClientClosed;
            }
            None => return EndReason::ClientClosed,
        };

        // Binary frames carrying UTF-8 JSON are accepted like text.
        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "received non-UTF8 binary frame");
                    let _ = hub.registry().touch_if_current(&ctx.user_id, ctx.generation);
                    continue;
                }
            },
            Message::Ping(_) => {
                connection.mark_alive();
                let _ = hub.registry().touch_if_current(&ctx.user_id, ctx.generation);
                continue;
            }
            Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                return EndReason::ClientClosed;
            }
        };

        let effect = hub.protocol().handle_frame(ctx, &text).await;
        for reply in &effect.replies {
            match encode(reply, hub.clock().now()) {
                Ok(json) => {
                    if !connection.send(json) {
                        debug!(kind = reply.kind(), "failed to enqueue reply");
                    }
                }
                Err(e) => warn!(kind = reply.kind(), error = %e, "failed to encode reply"),
            }
        }
    }
}

fn spawn_writer(
    mut ws_tx: WsSink,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ping_every: Duration,
    pong_timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    let frame = CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "server shutting down".into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                () = connection.closed() => {
                    let (code, reason) = connection.close_frame().unwrap_or((CLOSE_NORMAL, "closed"));
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !connection.check_alive() && connection.last_pong_elapsed() > pong_timeout {
                        warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                        let _ = ws_tx.send(Message::Close(Some(CloseFrame {
                            code: CLOSE_GOING_AWAY,
                            reason: "ping timeout".into(),
                        }))).await;
                        connection.close_with(CLOSE_GOING_AWAY, "ping timeout");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

async fn reject(ws: &mut WebSocket, err: &HandshakeError, remote_addr: Option<&str>) {
    let code = err.close_code();
    counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "code" => code.to_string()).increment(1);
    info!(code, remote_addr, error = %err, "handshake rejected");
    let frame = CloseFrame {
        code,
        reason: err.close_reason().into(),
    };
    if let Err(e) = ws.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "failed to send rejection close frame");
    }
}
