//! Per-connection traffic counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one connection. Updated from the caller, reader and handler
/// tasks without locking.
#[derive(Debug)]
pub struct ConnectionMetrics {
    requests: AtomicU64,
    responses: AtomicU64,
    errors: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    started: Instant,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMetrics {
    /// Zeroed counters; uptime starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// A request frame of `bytes` was queued.
    pub fn record_request(&self, bytes: usize) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.record_sent(bytes);
    }

    /// A non-request frame (a reply) of `bytes` was queued.
    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A frame of `bytes` was decoded.
    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A pending request resolved with a RESPONSE.
    pub fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    /// A pending request resolved with an ERROR, or the connection failed.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
        }
    }
}

/// Counter values read from [`ConnectionMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Request-response and fire-and-forget frames sent.
    pub requests: u64,
    /// Pending requests answered with a RESPONSE.
    pub responses: u64,
    /// Pending requests answered with an ERROR, plus connection failures.
    pub errors: u64,
    /// Encoded size of every frame queued for sending.
    pub bytes_sent: u64,
    /// Encoded size of every frame received.
    pub bytes_received: u64,
    /// Time since the connection was established.
    pub uptime: Duration,
}
