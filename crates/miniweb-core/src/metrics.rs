// src/metrics.rs
use crate::pool::ConnectionPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub req_count: AtomicUsize,
    pub bytes_sent: AtomicUsize,
    pub rejected: AtomicUsize,
    pub stale_events: AtomicUsize,
    pub idle_reaped: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: usize,
    pub active_connections: usize,
    pub bytes_sent: usize,
    pub rejected: usize,
    pub stale_events: usize,
    pub idle_reaped: usize,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_req(&self) {
        self.req_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_reaped(&self, n: usize) {
        self.idle_reaped.fetch_add(n, Ordering::Relaxed);
    }

    /// Copy the counters. Live connections are counted by the pool, not here.
    pub fn snapshot(&self, active_connections: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.req_count.load(Ordering::Relaxed),
            active_connections,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stale_events: self.stale_events.load(Ordering::Relaxed),
            idle_reaped: self.idle_reaped.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable read-only view of a server's counters and live connection count.
#[derive(Clone)]
pub struct MetricsHandle {
    metrics: Arc<ServerMetrics>,
    pool: Arc<ConnectionPool>,
}

impl MetricsHandle {
    pub(crate) fn new(metrics: Arc<ServerMetrics>, pool: Arc<ConnectionPool>) -> Self {
        Self { metrics, pool }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.pool.active_count())
    }

    pub fn max_connections(&self) -> usize {
        self.pool.max_active()
    }
}
