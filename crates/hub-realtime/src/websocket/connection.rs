//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hub_core::SessionHandle;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Outbound half of one connected client.
///
/// Messages go through a bounded queue drained by a single writer task, so
/// everything sent to one connection arrives in enqueue order.
pub struct ClientConnection {
    /// Opaque connection id.
    pub id: SessionHandle,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    close_frame: Mutex<Option<(u16, &'static str)>>,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection around the writer task's queue.
    pub fn new(id: SessionHandle, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            closed: CancellationToken::new(),
            close_frame: Mutex::new(None),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a serialized message.
    ///
    /// Returns `false` (and counts a drop) when the queue is full, the writer
    /// is gone, or the connection was closed.
    pub fn send(&self, message: Arc<String>) -> bool {
        if !self.closed.is_cancelled() && self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the session to shut the socket down. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Close with a specific WebSocket close code and reason.
    ///
    /// The first reason recorded wins; later calls only re-signal the close.
    pub fn close_with(&self, code: u16, reason: &'static str) {
        {
            let mut frame = self.close_frame.lock();
            if frame.is_none() && !self.closed.is_cancelled() {
                *frame = Some((code, reason));
            }
        }
        self.closed.cancel();
    }

    /// Close code and reason recorded by [`close_with`](Self::close_with).
    pub fn close_frame(&self) -> Option<(u16, &'static str)> {
        *self.close_frame.lock()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Record a pong (or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag. `true` if the client answered since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong or connection establishment.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(SessionHandle::from("conn_1"), tx), rx)
    }

    #[tokio::test]
    async fn send_preserves_order() {
        let (conn, mut rx) = make_connection(8);
        for i in 0..5 {
            assert!(conn.send(Arc::new(format!("msg_{i}"))));
        }
        for i in 0..5 {
            assert_eq!(*rx.recv().await.unwrap(), format!("msg_{i}"));
        }
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn full_queue_counts_drop() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("first".into())));
        assert!(!conn.send(Arc::new("second".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_receiver_counts_drop() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_rejects_sends_and_wakes_waiters() {
        let (conn, _rx) = make_connection(4);
        let conn = Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        conn.close();
        waiter.await.unwrap();
        assert!(conn.is_closed());
        assert!(!conn.send(Arc::new("late".into())));
    }

    #[test]
    fn first_close_reason_wins() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.close_frame(), None);
        conn.close_with(4008, "idle timeout");
        conn.close_with(4000, "session replaced");
        assert!(conn.is_closed());
        assert_eq!(conn.close_frame(), Some((4008, "idle timeout")));
    }

    #[test]
    fn plain_close_records_no_reason() {
        let (conn, _rx) = make_connection(1);
        conn.close();
        conn.close_with(4008, "idle timeout");
        assert_eq!(conn.close_frame(), None);
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }
}
