//! Client and server configuration.

use rsocket_protocol::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on request-response calls awaiting a reply per connection.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 10_000;

/// Configuration for a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long the transport handshake may take, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum request-response calls awaiting a reply at once.
    pub max_pending_requests: usize,
    /// Frames that may wait in the outbound queue before sends are refused.
    pub outbound_queue_size: usize,
    /// Largest frame sent or accepted, in bytes.
    pub max_frame_size: usize,
    /// How long `close` waits for queued frames to flush, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,       // 5 seconds
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            outbound_queue_size: 1024,
            max_frame_size: MAX_FRAME_SIZE, // 10MB
            close_timeout_ms: 1000,
        }
    }
}

impl ClientConfig {
    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Close timeout as a duration.
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Configuration for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum live connections across all listeners.
    pub max_connections: usize,
    /// How long a WebSocket upgrade may take, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// How long one handler call may run, in milliseconds. `0` disables the limit.
    pub handler_timeout_ms: u64,
    /// Requests each connection may originate and await at once.
    pub max_pending_requests: usize,
    /// Frames that may wait in each connection's outbound queue.
    pub outbound_queue_size: usize,
    /// Largest frame sent or accepted, in bytes.
    pub max_frame_size: usize,
    /// How long closing a connection waits for replies to flush, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            handshake_timeout_ms: 5000,     // 5 seconds
            handler_timeout_ms: 30_000,     // 30 seconds
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            outbound_queue_size: 1024,
            max_frame_size: MAX_FRAME_SIZE, // 10MB
            close_timeout_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Handshake timeout as a duration.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Handler timeout, or `None` when disabled.
    #[must_use]
    pub const fn handler_timeout(&self) -> Option<Duration> {
        if self.handler_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.handler_timeout_ms))
        }
    }

    /// Close timeout as a duration.
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
