//! Error types for transport operations

use rsocket_protocol::ProtocolError;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Transport-related errors
///
/// Cloneable so a single failure can be reported to every request that was
/// waiting on the connection.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Address could not be parsed or does not fit the transport
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Peer sent bytes that are not a valid frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection closed
    #[error("Connection closed")]
    Closed,

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl TransportError {
    /// Create an invalid address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout(operation.into())
    }

    /// Whether this error means the peer went away rather than misbehaved.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        // Codec failures arrive as InvalidData wrapping the protocol error
        let protocol = if err.kind() == io::ErrorKind::InvalidData {
            err.get_ref()
                .and_then(|inner| inner.downcast_ref::<ProtocolError>())
                .cloned()
        } else {
            None
        };
        match protocol {
            Some(protocol) => Self::Protocol(protocol),
            None => Self::Io(Arc::new(err)),
        }
    }
}
