//! Error types for the engine.

use crate::connection::ConnectionState;
use rsocket_protocol::ProtocolError;
use rsocket_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for engine operations.
///
/// Cloneable so that one connection failure can complete every request that
/// was waiting on it.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Connection-related errors.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Malformed frames or protocol misuse.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A request handler failed.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// A local limit was hit.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Server lifecycle errors.
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Broad category of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Handshake or transport failure, or the connection is gone.
    Connection,
    /// Malformed frame or unknown request id.
    Protocol,
    /// The remote or local handler failed.
    Handler,
    /// A local limit or allocation failure.
    Resource,
}

impl Error {
    /// The category this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::Server(ServerError::Bind { .. }) => ErrorKind::Connection,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Handler(_) => ErrorKind::Handler,
            Self::Resource(_) | Self::Server(_) => ErrorKind::Resource,
        }
    }

    /// Whether the error means the connection is closed or closing.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Connection(ConnectionError::Closed))
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(err) => Self::Protocol(err),
            TransportError::Closed => Self::Connection(ConnectionError::Closed),
            other => Self::Connection(ConnectionError::Transport(other)),
        }
    }
}

/// Connection-specific errors.
#[derive(Clone, Debug, Error)]
pub enum ConnectionError {
    /// Failed to establish connection.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// The address we tried to connect to.
        addr: String,
        /// The underlying error.
        #[source]
        source: TransportError,
    },

    /// The handshake did not finish in time.
    #[error("Connecting to {addr} timed out after {timeout:?}")]
    Timeout {
        /// The address we tried to connect to.
        addr: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// Connection closed, locally or by the peer.
    #[error("Connection closed")]
    Closed,

    /// The connection is not in a state that allows sending.
    #[error("Connection is {0}")]
    NotConnected(ConnectionState),

    /// The transport failed while the connection was in use.
    #[error("Transport failure: {0}")]
    Transport(TransportError),
}

/// Handler errors, from either side of a request-response call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("{0}")]
    Failed(String),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// The handler did not finish in time.
    #[error("Handler timed out after {0:?}")]
    TimedOut(Duration),

    /// The connection has no handler for inbound requests.
    #[error("No handler registered")]
    NoHandler,

    /// The peer answered with an ERROR frame.
    #[error("Remote error: {0}")]
    Remote(String),
}

impl HandlerError {
    /// Create a handler failure from a message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self::Failed(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self::Failed(msg)
    }
}

/// Local resource limits.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// The outbound queue is full.
    #[error("Outbound queue full ({capacity} frames)")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// Too many request-response calls are awaiting replies.
    #[error("Too many pending requests: {current}/{max}")]
    TooManyPending {
        /// Current number of pending requests.
        current: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// The payload does not fit in one frame.
    #[error("Payload too large: frame of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Encoded frame size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// Server lifecycle errors.
#[derive(Clone, Debug, Error)]
pub enum ServerError {
    /// No listen address was configured.
    #[error("No listen address configured")]
    NoListeners,

    /// Binding a listener failed.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: String,
        /// The underlying error.
        #[source]
        source: TransportError,
    },

    /// `start` was called more than once.
    #[error("Server already started")]
    AlreadyStarted,

    /// `start` was called after `close`.
    #[error("Server is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::from(ConnectionError::Closed).kind(), ErrorKind::Connection);
        assert_eq!(
            Error::from(ProtocolError::UnknownFrameType(9)).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(Error::from(HandlerError::NoHandler).kind(), ErrorKind::Handler);
        assert_eq!(
            Error::from(ResourceError::QueueFull { capacity: 1 }).kind(),
            ErrorKind::Resource
        );
        assert_eq!(Error::from(ServerError::AlreadyStarted).kind(), ErrorKind::Resource);
        assert_eq!(Error::from(ServerError::Closed).kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_transport_error_conversion() {
        let err = Error::from(TransportError::Protocol(ProtocolError::TrailingBytes(2)));
        assert!(matches!(err, Error::Protocol(ProtocolError::TrailingBytes(2))));

        let err = Error::from(TransportError::Closed);
        assert!(err.is_closed());

        let err = Error::from(TransportError::timeout("write"));
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::Transport(TransportError::Timeout(_)))
        ));
    }

    #[test]
    fn test_handler_error_message() {
        let err: HandlerError = "boom".into();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(
            HandlerError::Remote("boom".into()).to_string(),
            "Remote error: boom"
        );
    }
}
