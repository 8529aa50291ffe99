//! Graceful shutdown: one cancellation token plus a tracker for live
//! WebSocket sessions.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Default time sessions and background tasks get to finish.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How a shutdown ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether the timeout elapsed before everything finished.
    pub timed_out: bool,
    /// Sessions still running when the wait ended.
    pub sessions_remaining: usize,
}

/// Shared by the listener, the reaper, and every session.
///
/// Sessions are tracked so shutdown can wait for their close frames to be
/// flushed; background tasks are passed in as join handles and aborted if
/// they outlive the timeout.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Not yet shutting down.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the shared token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wrap a session future so shutdown waits for it.
    pub fn track_session<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Signal every task. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for `handles` and every
    /// tracked session. Handles still running at the deadline are aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> ShutdownReport {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        let _ = self.sessions.close();
        info!(
            task_count = handles.len(),
            sessions = self.sessions.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.sessions.wait().await;
        };
        let timed_out = tokio::time::timeout(timeout, drain).await.is_err();
        if timed_out {
            for abort in &aborts {
                abort.abort();
            }
            warn!(
                sessions = self.sessions.len(),
                "shutdown timed out after {timeout:?}, aborting remaining tasks"
            );
        }
        ShutdownReport {
            timed_out,
            sessions_remaining: self.sessions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_observe_shutdown() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn clean_shutdown_with_no_work() {
        let coord = ShutdownCoordinator::new();
        let report = coord.graceful_shutdown(Vec::new(), Some(Duration::from_secs(1))).await;
        assert_eq!(
            report,
            ShutdownReport {
                timed_out: false,
                sessions_remaining: 0,
            }
        );
    }

    #[tokio::test]
    async fn waits_for_cooperative_tasks_and_sessions() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });

        let session_token = coord.token();
        let session = tokio::spawn(coord.track_session(async move {
            session_token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }));
        assert_eq!(coord.active_sessions(), 1);

        let report = coord
            .graceful_shutdown(vec![handle], Some(Duration::from_secs(2)))
            .await;
        assert!(!report.timed_out);
        assert_eq!(report.sessions_remaining, 0);
        session.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_stuck_tasks_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort = stuck.abort_handle();

        let report = coord
            .graceful_shutdown(vec![stuck], Some(Duration::from_millis(50)))
            .await;
        assert!(report.timed_out);
        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_sessions_that_ignore_shutdown() {
        let coord = ShutdownCoordinator::new();
        let _session = tokio::spawn(coord.track_session(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));

        let report = coord
            .graceful_shutdown(Vec::new(), Some(Duration::from_millis(50)))
            .await;
        assert!(report.timed_out);
        assert_eq!(report.sessions_remaining, 1);
    }
}
