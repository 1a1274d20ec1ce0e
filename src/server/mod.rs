//! Local web UI for reviewing and cleaning duplicate groups.
//!
//! Endpoints:
//! - GET  /            - single-page UI
//! - GET  /api/groups  - duplicate groups with keep and remove members
//! - POST /api/clean   - cull Remove members by path
//! - GET  /api/image   - raw bytes of a scanned image
//! - GET  /ws          - connection heartbeat and tab visibility
//!
//! The server stops on Ctrl+C, SIGTERM, or once nothing has happened for the
//! idle timeout. An open tab or WebSocket client counts as activity.

pub mod error;
pub mod http;
pub mod ws;

use crate::database::Storage;
use crate::history::CullHistory;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};

pub use error::ServerError;
pub use http::router;

/// How often the idle timer looks at the activity tracker.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Mutex<Storage>>,
    pub history: Arc<CullHistory>,
    pub activity: Arc<ActivityTracker>,
    /// Flipped to `true` when the server starts shutting down.
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(storage: Storage, history: CullHistory) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            storage: Arc::new(Mutex::new(storage)),
            history: Arc::new(history),
            activity: Arc::new(ActivityTracker::new()),
            shutdown: Arc::new(shutdown),
        }
    }
}

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Idle,
}

/// Last-activity clock plus the connected clients that keep the server alive.
#[derive(Debug)]
pub struct ActivityTracker {
    started: Instant,
    last_activity_ms: AtomicU64,
    tab_active: AtomicBool,
    clients: AtomicUsize,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            tab_active: AtomicBool::new(false),
            clients: AtomicUsize::new(0),
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(self.elapsed_ms(), Ordering::Relaxed);
    }

    pub fn set_tab_active(&self, active: bool) {
        self.tab_active.store(active, Ordering::Relaxed);
        self.touch();
    }

    /// Register a WebSocket client until the returned guard is dropped.
    pub fn client_connected(self: &Arc<Self>) -> ClientGuard {
        self.clients.fetch_add(1, Ordering::Relaxed);
        self.touch();
        ClientGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// A visible tab or any connected client holds off the idle timeout.
    pub fn is_engaged(&self) -> bool {
        self.tab_active.load(Ordering::Relaxed) || self.clients() > 0
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ClientGuard {
    tracker: Arc<ActivityTracker>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let before = self.tracker.clients.fetch_sub(1, Ordering::Relaxed);
        // A closed last tab cannot report itself hidden.
        if before == 1 {
            self.tracker.tab_active.store(false, Ordering::Relaxed);
        }
        self.tracker.touch();
    }
}

/// Resolve once `activity` has been idle for `idle_timeout`, checking every
/// `check_every`. Engaged periods count as activity.
pub async fn wait_until_idle(
    activity: Arc<ActivityTracker>,
    idle_timeout: Duration,
    check_every: Duration,
) {
    let mut ticker = tokio::time::interval(check_every);
    loop {
        ticker.tick().await;
        if activity.is_engaged() {
            activity.touch();
            continue;
        }
        if activity.idle_for() >= idle_timeout {
            return;
        }
    }
}

/// Serve the web UI on `listener` until a signal arrives or the server has
/// been idle for `idle_timeout` (zero disables the idle timeout).
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    idle_timeout: Duration,
) -> std::io::Result<ShutdownReason> {
    let (reason_tx, mut reason_rx) = oneshot::channel();
    let activity = Arc::clone(&state.activity);
    let shutdown = Arc::clone(&state.shutdown);

    let shutdown_trigger = async move {
        let reason = tokio::select! {
            _ = shutdown_signal() => ShutdownReason::Signal,
            _ = idle_shutdown(activity, idle_timeout) => ShutdownReason::Idle,
        };
        // Open WebSockets would otherwise hold the graceful shutdown open.
        shutdown.send_replace(true);
        let _ = reason_tx.send(reason);
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_trigger)
        .await?;

    Ok(reason_rx.try_recv().unwrap_or(ShutdownReason::Signal))
}

async fn idle_shutdown(activity: Arc<ActivityTracker>, idle_timeout: Duration) {
    if idle_timeout.is_zero() {
        std::future::pending::<()>().await;
    }
    wait_until_idle(activity, idle_timeout, IDLE_CHECK_INTERVAL.min(idle_timeout)).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_guard_tracks_connections() {
        let activity = Arc::new(ActivityTracker::new());
        assert!(!activity.is_engaged());

        let first = activity.client_connected();
        let second = activity.client_connected();
        activity.set_tab_active(true);
        assert_eq!(activity.clients(), 2);

        drop(first);
        assert!(activity.is_engaged());

        // Last client gone: the tab can no longer be visible.
        drop(second);
        assert_eq!(activity.clients(), 0);
        assert!(!activity.is_engaged());
    }

    #[tokio::test]
    async fn test_idle_timer_fires_without_activity() {
        let activity = Arc::new(ActivityTracker::new());
        let idle = wait_until_idle(
            activity,
            Duration::from_millis(50),
            Duration::from_millis(10),
        );
        assert!(tokio::time::timeout(Duration::from_secs(5), idle).await.is_ok());
    }

    #[tokio::test]
    async fn test_connected_client_holds_off_idle_timer() {
        let activity = Arc::new(ActivityTracker::new());
        let _client = activity.client_connected();

        let idle = wait_until_idle(
            Arc::clone(&activity),
            Duration::from_millis(30),
            Duration::from_millis(10),
        );
        assert!(tokio::time::timeout(Duration::from_millis(300), idle)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_when_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let storage = Storage::open_in_memory().unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let state = AppState::new(storage, CullHistory::new(temp_dir.path().join("h.jsonl")));

        let served = tokio::time::timeout(
            Duration::from_secs(10),
            serve(listener, state.clone(), Duration::from_millis(50)),
        )
        .await;

        assert_eq!(served.unwrap().unwrap(), ShutdownReason::Idle);
        assert!(*state.shutdown.borrow());
    }
}
