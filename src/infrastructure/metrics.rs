//! Metrics collection for relay monitoring
//!
//! Lock-free counters using atomic operations.
//! Updated from the hub loop, the router and the collector; exported via API.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Relay metrics collector
///
/// Thread-safe counters updated from worker tasks.
/// Snapshots taken for API export.
pub struct MetricsCollector {
    /// Connections accepted into a session
    connections_registered: AtomicU64,
    /// Connections removed from a session (unregister or teardown)
    connections_unregistered: AtomicU64,
    /// Frames queued for delivery by fan-out
    messages_delivered: AtomicU64,
    /// Connections dropped because their outbound queue was full
    evictions: AtomicU64,
    /// Sessions torn down because the master left
    teardowns: AtomicU64,
    /// Inbound payloads dropped as malformed
    malformed_dropped: AtomicU64,
    /// Debug sessions that collected every sample
    collector_completed: AtomicU64,
    /// Debug sessions finalized by their deadline
    collector_timed_out: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for API export
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub connections_registered: u64,
    pub connections_unregistered: u64,
    pub active_connections: u64,
    pub messages_delivered: u64,
    pub evictions: u64,
    pub teardowns: u64,
    pub malformed_dropped: u64,
    pub collector_completed: u64,
    pub collector_timed_out: u64,
    pub message_rate: f64, // messages per second
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            connections_registered: AtomicU64::new(0),
            connections_unregistered: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            collector_completed: AtomicU64::new(0),
            collector_timed_out: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_connection_registered(&self) {
        self.connections_registered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection_unregistered(&self) {
        self.connections_unregistered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connections_unregistered(&self, count: u64) {
        self.connections_unregistered.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// Evicted connections also count as unregistered
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.connections_unregistered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finalized debug session
    pub fn record_collector_finished(&self, timed_out: bool) {
        if timed_out {
            self.collector_timed_out.fetch_add(1, Ordering::Relaxed);
        } else {
            self.collector_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let registered = self.connections_registered.load(Ordering::Relaxed);
        let unregistered = self.connections_unregistered.load(Ordering::Relaxed);
        let delivered = self.messages_delivered.load(Ordering::Relaxed);

        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            delivered as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            connections_registered: registered,
            connections_unregistered: unregistered,
            active_connections: registered.saturating_sub(unregistered),
            messages_delivered: delivered,
            evictions: self.evictions.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            collector_completed: self.collector_completed.load(Ordering::Relaxed),
            collector_timed_out: self.collector_timed_out.load(Ordering::Relaxed),
            message_rate: rate,
            uptime_seconds: uptime,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
