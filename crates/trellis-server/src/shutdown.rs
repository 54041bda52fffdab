//! Graceful shutdown.
//!
//! A [`ShutdownSignal`] is shared by the accept loop, every connection task
//! and the configuration reloader. Once triggered, the accept loop stops,
//! connections finish their current exchange and the [`ConnectionTracker`]
//! reports when the last one is gone.
//!
//! Both are thin wrappers over [`tokio::sync::watch`]: the signal watches a
//! flag, the tracker watches a count.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable trigger that every task can await.
///
/// ```rust
/// use trellis_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let observer = shutdown.clone();
/// shutdown.trigger();
/// assert!(observer.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    flag: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }

    /// Triggers shutdown. Later calls do nothing.
    pub fn trigger(&self) {
        let first = self.flag.send_if_modified(|triggered| !std::mem::replace(triggered, true));
        if first {
            tracing::debug!("shutdown triggered");
        }
    }

    /// Returns `true` once shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.flag.borrow()
    }

    /// Completes when shutdown is triggered, at once if it already was.
    pub async fn recv(&self) {
        let mut flag = self.flag.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = flag.wait_for(|triggered| *triggered).await;
    }

    /// Creates a signal triggered by SIGTERM or SIGINT (Ctrl+C elsewhere).
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "cannot install signal handlers; falling back to Ctrl+C");
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("received Ctrl+C, shutting down");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Counts open connections so shutdown can wait for them.
///
/// ```rust
/// use trellis_server::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let connection = tracker.open();
/// assert_eq!(tracker.open_connections(), 1);
/// drop(connection);
/// assert_eq!(tracker.open_connections(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    count: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count: Arc::new(count) }
    }

    /// Registers a connection until the returned handle is dropped.
    #[must_use]
    pub fn open(&self) -> OpenConnection {
        self.count.send_modify(|count| *count += 1);
        OpenConnection {
            count: Arc::clone(&self.count),
        }
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        *self.count.borrow()
    }

    /// Completes once no connection is open.
    pub async fn idle(&self) {
        let mut count = self.count.subscribe();
        let _ = count.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// One open connection, released on drop.
#[derive(Debug)]
pub struct OpenConnection {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}
