//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live client connections and tunnels
//! - Let shutdown wait for the count to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::metrics;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    idle: Notify,
}

/// Counts in-flight connections for graceful shutdown.
///
/// Client connections and upgraded tunnels are tracked separately,
/// since a tunnel outlives the HTTP connection that opened it.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection. The guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_connections(active);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until nothing is tracked. Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Tracks one connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_connections(remaining);
        if remaining == 0 {
            self.inner.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
